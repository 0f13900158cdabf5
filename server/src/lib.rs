//! # Quest server library
//!
//! Internal network repository for the two server roles that sit behind the
//! Astron Message Director.
//!
//! ## Roles
//!
//! ### AI
//! Hosts one shard of the world. On connect it creates a
//! `DistributedShardServer` under the game root in the shards zone, takes
//! control of it, generates its global objects and then flips the shard to
//! available. On shutdown the shard is flipped back to unavailable before it
//! is deleted, so clients never select a shard that is going away.
//!
//! ### UberDOG
//! Hosts cross-shard singletons: the root `DistributedGame` object at
//! `GLOBAL_GAME_ROOT` and the `LoginManager`, which authenticates clients,
//! promotes their Client Agent connection and opens the base interest.
//!
//! ## Module Organization
//!
//! - `repository`: the [`InternalRepository`] and the context handed to
//!   field handlers. Each inbound datagram is processed in isolation; a
//!   failing message ejects its sender and the loop carries on.
//! - `ai` / `uberdog`: role-specific startup and teardown.
//! - `shard`, `login`, `game`: the distributed classes each role registers.
//! - `events`: server event forwarding to the analytics stream.
//! - `network`: tokio driver connecting a repository to the Message
//!   Director.
//!
//! ## Threading
//!
//! All repository state lives on one task. Socket reads and writes run in
//! spawned tasks that only move frames across unbounded channels.

pub mod ai;
pub mod error;
pub mod events;
pub mod game;
pub mod login;
pub mod network;
pub mod repository;
pub mod shard;
pub mod uberdog;

pub use error::RepositoryError;
pub use events::{EventSink, NullSink, PlayFabSink, RecordingSink, TitleEvent};
pub use login::{AccountTable, AuthFailure, Authenticator};
pub use network::InternalServer;
pub use repository::{InternalContext, InternalRepository};
