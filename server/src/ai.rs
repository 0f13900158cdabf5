//! AI role: one process per shard of the world.

use crate::error::RepositoryError;
use crate::login::LoginManagerAI;
use crate::repository::{InternalContext, InternalRepository};
use crate::shard::DistributedShardServerAI;
use log::{info, warn};
use shared::constants::{GLOBAL_GAME_ROOT, ZONE_ID_SHARDS};
use shared::{
    AllocatorError, ChannelAllocator, ChannelId, ClassRegistry, DoId, ObjectLocation, SchemaError,
};

pub(crate) fn register_classes(
    registry: &mut ClassRegistry<InternalContext>,
) -> Result<(), SchemaError> {
    registry.register::<DistributedShardServerAI>()?;
    registry.register::<LoginManagerAI>()
}

/// Shard ids come from the AI's own channel range.
pub(crate) fn allocate_shard_id(allocator: &mut ChannelAllocator) -> Result<DoId, RepositoryError> {
    let channel = allocator.allocate()?;
    DoId::try_from(channel).map_err(|_| AllocatorError::OutOfRange(channel).into())
}

impl InternalRepository {
    /// Creates the shard object, takes control of it, generates the
    /// globals and finally announces the shard as available.
    pub(crate) fn start_shard(&mut self) -> Result<(), RepositoryError> {
        let Some(shard_id) = self.shard_id else {
            warn!("AI repository has no shard id, not starting a shard");
            return Ok(());
        };

        info!("Creating Shard Server instance ({})", shard_id);
        let shard = Box::new(DistributedShardServerAI::new(self.shard_name.clone()));
        self.generate_with_required_and_id(
            shard,
            ObjectLocation::new(shard_id, GLOBAL_GAME_ROOT, ZONE_ID_SHARDS),
        )?;

        let our_channel = self.our_channel();
        self.set_ai(shard_id, our_channel)?;
        self.ctx.add_channel(shard_id as ChannelId)?;

        self.generate_global_objects()?;

        self.with_object::<DistributedShardServerAI, _, _>(shard_id, |shard, ctx| {
            shard.b_set_available(ctx, true)
        })?;
        info!("Server Shard ({}) is ready.", self.shard_name);
        Ok(())
    }

    /// Withdraws the shard: unavailable first, then deleted from the state
    /// server, unsubscribed and its id returned to the allocator.
    pub(crate) fn stop_shard(&mut self) -> Result<(), RepositoryError> {
        let Some(shard_id) = self.shard_id.take() else {
            return Ok(());
        };

        if self.objects.contains(shard_id) {
            self.delete_object(shard_id)?;
            self.ctx.remove_channel(shard_id as ChannelId)?;
        }

        self.ctx.free_channel(shard_id as ChannelId)?;
        info!("Server Shard ({}) withdrawn", self.shard_name);
        Ok(())
    }
}
