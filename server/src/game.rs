//! Root of the game's object tree. It carries no fields; everything the game
//! owns inside the state server is parented under it.

use crate::repository::InternalContext;
use shared::schema::DISTRIBUTED_GAME;
use shared::{DistributedClass, DistributedObject, FieldHandler, ObjectCore};

pub struct DistributedGameAI {
    core: ObjectCore,
}

impl DistributedObject<InternalContext> for DistributedGameAI {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.core
    }
}

impl DistributedClass<InternalContext> for DistributedGameAI {
    const CLASS_NAME: &'static str = DISTRIBUTED_GAME;

    fn create() -> Self {
        Self {
            core: ObjectCore::new(),
        }
    }

    fn field_handlers() -> Vec<(&'static str, FieldHandler<Self, InternalContext>)> {
        Vec::new()
    }
}
