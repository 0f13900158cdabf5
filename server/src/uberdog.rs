//! UberDOG role: owns the game root and the login manager.

use crate::error::RepositoryError;
use crate::game::DistributedGameAI;
use crate::login::LoginManagerUD;
use crate::repository::{InternalContext, InternalRepository};
use log::info;
use shared::constants::{GLOBAL_GAME_ROOT, ZONE_ID_GAME_ROOT};
use shared::schema::DISTRIBUTED_GAME;
use shared::{ClassRegistry, ObjectLocation, SchemaError};

pub(crate) fn register_classes(
    registry: &mut ClassRegistry<InternalContext>,
) -> Result<(), SchemaError> {
    registry.register::<DistributedGameAI>()?;
    registry.register::<LoginManagerUD>()
}

impl InternalRepository {
    pub(crate) fn start_uberdog(&mut self) -> Result<(), RepositoryError> {
        info!("Generating root game object ({})", GLOBAL_GAME_ROOT);
        let root = self.registry.create(DISTRIBUTED_GAME)?;
        self.generate_with_required_and_id(
            root,
            ObjectLocation::new(GLOBAL_GAME_ROOT, 0, ZONE_ID_GAME_ROOT),
        )?;

        self.generate_global_objects()?;
        info!("UberDOG ready on channel {}", self.our_channel());
        Ok(())
    }
}
