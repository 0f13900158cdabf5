//! Identifiers shared by convention between the client, AI and UberDOG builds.
//!
//! These values are a deployment contract with the Astron cluster
//! configuration. They are never derived at runtime, so a mismatch between
//! builds makes cross-process calls silently fail to resolve.

use crate::channel::{ChannelId, DoId, ZoneId};
use crate::schema::{DISTRIBUTED_GAME, LOGIN_MANAGER};

/// Version string announced in the client hello.
pub const APPLICATION_VERSION: &str = "quest-dev";

/// Well-known registry keys of the global singleton objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalObjectId {
    GameRoot,
    LoginManager,
}

impl GlobalObjectId {
    pub const fn do_id(self) -> DoId {
        match self {
            GlobalObjectId::GameRoot => GLOBAL_GAME_ROOT,
            GlobalObjectId::LoginManager => DOG_LOGIN_MANAGER,
        }
    }

    /// Schema class instantiated at this key.
    pub const fn class_name(self) -> &'static str {
        match self {
            GlobalObjectId::GameRoot => DISTRIBUTED_GAME,
            GlobalObjectId::LoginManager => LOGIN_MANAGER,
        }
    }

    pub fn from_do_id(do_id: DoId) -> Option<Self> {
        match do_id {
            GLOBAL_GAME_ROOT => Some(GlobalObjectId::GameRoot),
            DOG_LOGIN_MANAGER => Some(GlobalObjectId::LoginManager),
            _ => None,
        }
    }
}

pub const GLOBAL_GAME_ROOT: DoId = 4000;
pub const DOG_LOGIN_MANAGER: DoId = 4100;

pub const UBERDOG_DEFAULT_CHANNEL: ChannelId = 300000;
pub const AI_DEFAULT_CHANNEL: ChannelId = 300001;
pub const STATE_SERVER_DEFAULT_CHANNEL: ChannelId = 402000;
pub const DATABASE_SERVER_DEFAULT_CHANNEL: ChannelId = 403000;

/// Channel the Message Director listens on for control messages.
pub const CONTROL_CHANNEL: ChannelId = 1;

pub const ZONE_ID_INVALID: ZoneId = 0;
/// Zone holding every registered shard server.
pub const ZONE_ID_SHARDS: ZoneId = 1;
/// Zone of the root game object under its own parent.
pub const ZONE_ID_GAME_ROOT: ZoneId = 1;

/// Zones a freshly authenticated client is given interest in.
pub const STARTING_NETWORK_ZONES: &[ZoneId] = &[ZONE_ID_SHARDS];

/// Client-agent state for a fully authenticated client.
pub const CLIENT_STATE_ESTABLISHED: u16 = 2;

/// Failure code returned by the login manager for rejected credentials.
pub const AUTH_FAILURE_INVALID_CREDENTIALS: u16 = 100;

/// Connection failure codes raised locally by the client.
pub const FAILURE_CODE_CONNECT: u16 = 1;
pub const FAILURE_CODE_LOST_CONNECTION: u16 = 2;

/// Eject code sent to a client whose message crashed server-side dispatch.
pub const EJECT_CODE_SERVER_ERROR: u16 = 166;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_ids_round_trip() {
        for id in [GlobalObjectId::GameRoot, GlobalObjectId::LoginManager] {
            assert_eq!(GlobalObjectId::from_do_id(id.do_id()), Some(id));
        }
        assert_eq!(GlobalObjectId::from_do_id(77), None);
    }

    #[test]
    fn test_default_channels_are_distinct() {
        let channels = [
            UBERDOG_DEFAULT_CHANNEL,
            AI_DEFAULT_CHANNEL,
            STATE_SERVER_DEFAULT_CHANNEL,
            DATABASE_SERVER_DEFAULT_CHANNEL,
        ];
        for (i, a) in channels.iter().enumerate() {
            for b in &channels[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
