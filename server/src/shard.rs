//! AI side of the shard registry.
//!
//! Each AI process owns exactly one shard object. It is created unavailable,
//! flipped to available once the AI finishes starting, and flipped back to
//! unavailable right before it is deleted, so clients never pick a shard
//! that is going away.

use crate::repository::InternalContext;
use log::{info, warn};
use shared::field_args;
use shared::protocol::RequiredField;
use shared::schema::DISTRIBUTED_SHARD_SERVER;
use shared::{
    DistributedClass, DistributedObject, FieldArgs, FieldHandler, ObjectCore, ObjectError,
    ShardDescriptor,
};

pub struct DistributedShardServerAI {
    core: ObjectCore,
    name: String,
    available: bool,
}

impl DistributedShardServerAI {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: ObjectCore::new(),
            name: name.into(),
            available: false,
        }
    }

    pub fn get_available(&self) -> bool {
        self.available
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn set_available(&mut self, ctx: &mut InternalContext, available: bool) {
        self.available = available;
        if let Some(do_id) = self.core.do_id() {
            ctx.shards_mut()
                .update(do_id, |shard| shard.available = available);
        }
    }

    pub fn d_set_available(
        &self,
        ctx: &mut InternalContext,
        available: bool,
    ) -> Result<(), ObjectError> {
        self.core
            .send_field_update(ctx, "set_available", field_args![available])
    }

    /// Sets locally, then broadcasts. The broadcast may fail after the local
    /// change is applied.
    pub fn b_set_available(
        &mut self,
        ctx: &mut InternalContext,
        available: bool,
    ) -> Result<(), ObjectError> {
        self.set_available(ctx, available);
        self.d_set_available(ctx, available)
    }

    pub fn set_name(&mut self, ctx: &mut InternalContext, name: &str) {
        self.name = name.to_string();
        if let Some(do_id) = self.core.do_id() {
            ctx.shards_mut()
                .update(do_id, |shard| shard.name = name.to_string());
        }
    }

    pub fn b_set_name(&mut self, ctx: &mut InternalContext, name: &str) -> Result<(), ObjectError> {
        self.set_name(ctx, name);
        self.core
            .send_field_update(ctx, "set_name", field_args![name])
    }

    fn handle_set_name(
        &mut self,
        ctx: &mut InternalContext,
        args: &FieldArgs,
    ) -> Result<(), ObjectError> {
        let name = args.str_at(0).map_err(|source| ObjectError::BadArguments {
            field: "set_name".to_string(),
            source,
        })?;
        self.set_name(ctx, name);
        Ok(())
    }

    fn handle_set_available(
        &mut self,
        ctx: &mut InternalContext,
        args: &FieldArgs,
    ) -> Result<(), ObjectError> {
        let available = args.bool_at(0).map_err(|source| ObjectError::BadArguments {
            field: "set_available".to_string(),
            source,
        })?;
        self.set_available(ctx, available);
        Ok(())
    }
}

impl DistributedObject<InternalContext> for DistributedShardServerAI {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.core
    }

    fn required_fields(&self) -> Vec<RequiredField> {
        vec![
            ("set_name".to_string(), field_args![self.name.as_str()]),
            ("set_available".to_string(), field_args![self.available]),
        ]
    }

    fn announce_generate(&mut self, ctx: &mut InternalContext) -> Result<(), ObjectError> {
        let do_id = self.core.do_id().ok_or(ObjectError::NotGenerated)?;
        let mut descriptor = ShardDescriptor::new(do_id, self.name.clone());
        descriptor.available = self.available;

        let shards = ctx.shards_mut();
        shards.insert(descriptor);
        shards.select(do_id);
        info!("Shard {} ({}) registered", self.name, do_id);
        Ok(())
    }

    fn on_delete(&mut self, ctx: &mut InternalContext) {
        if self.available {
            if let Err(e) = self.b_set_available(ctx, false) {
                warn!("Failed to mark shard {} unavailable: {}", self.name, e);
            }
        }

        if let Some(do_id) = self.core.do_id() {
            ctx.shards_mut().remove(do_id);
        }
    }
}

impl DistributedClass<InternalContext> for DistributedShardServerAI {
    const CLASS_NAME: &'static str = DISTRIBUTED_SHARD_SERVER;

    fn create() -> Self {
        Self::new("Undefined")
    }

    fn field_handlers() -> Vec<(&'static str, FieldHandler<Self, InternalContext>)> {
        vec![
            ("set_name", Self::handle_set_name),
            ("set_available", Self::handle_set_available),
        ]
    }
}
