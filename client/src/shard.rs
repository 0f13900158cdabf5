//! Client mirror of the shard servers in our interest.
//!
//! Every change to the mirrored set (a shard entering, changing or leaving)
//! raises [`ClientEvent::ShardListUpdated`].

use crate::repository::{ClientContext, ClientEvent};
use shared::schema::DISTRIBUTED_SHARD_SERVER;
use shared::{
    DistributedClass, DistributedObject, FieldArgs, FieldHandler, ObjectCore, ObjectError,
    ShardDescriptor,
};

pub struct DistributedShardServer {
    core: ObjectCore,
    name: String,
    available: bool,
}

impl DistributedShardServer {
    pub fn get_available(&self) -> bool {
        self.available
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Refreshes our directory entry once we are announced.
    fn refresh(&self, ctx: &mut ClientContext) {
        let Some(do_id) = self.core.do_id() else {
            return;
        };
        let (name, available) = (self.name.clone(), self.available);
        if ctx.shards_mut().update(do_id, |shard| {
            shard.name = name;
            shard.available = available;
        }) {
            ctx.raise(ClientEvent::ShardListUpdated);
        }
    }

    fn set_name(&mut self, ctx: &mut ClientContext, args: &FieldArgs) -> Result<(), ObjectError> {
        self.name = args
            .str_at(0)
            .map_err(|source| ObjectError::BadArguments {
                field: "set_name".to_string(),
                source,
            })?
            .to_string();
        self.refresh(ctx);
        Ok(())
    }

    fn set_available(
        &mut self,
        ctx: &mut ClientContext,
        args: &FieldArgs,
    ) -> Result<(), ObjectError> {
        self.available = args.bool_at(0).map_err(|source| ObjectError::BadArguments {
            field: "set_available".to_string(),
            source,
        })?;
        self.refresh(ctx);
        Ok(())
    }
}

impl DistributedObject<ClientContext> for DistributedShardServer {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.core
    }

    fn announce_generate(&mut self, ctx: &mut ClientContext) -> Result<(), ObjectError> {
        let do_id = self.core.do_id().ok_or(ObjectError::NotGenerated)?;
        let mut descriptor = ShardDescriptor::new(do_id, self.name.clone());
        descriptor.available = self.available;
        ctx.shards_mut().insert(descriptor);
        ctx.raise(ClientEvent::ShardListUpdated);
        Ok(())
    }

    fn on_delete(&mut self, ctx: &mut ClientContext) {
        if let Some(do_id) = self.core.do_id() {
            if ctx.shards_mut().remove(do_id).is_some() {
                ctx.raise(ClientEvent::ShardListUpdated);
            }
        }
    }
}

impl DistributedClass<ClientContext> for DistributedShardServer {
    const CLASS_NAME: &'static str = DISTRIBUTED_SHARD_SERVER;

    fn create() -> Self {
        Self {
            core: ObjectCore::new(),
            name: "Undefined".to_string(),
            available: false,
        }
    }

    fn field_handlers() -> Vec<(&'static str, FieldHandler<Self, ClientContext>)> {
        vec![
            ("set_name", Self::set_name),
            ("set_available", Self::set_available),
        ]
    }
}
