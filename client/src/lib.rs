//! # Quest client library
//!
//! Client side of the distributed-object layer: the repository that talks to
//! the Astron Client Agent, the connection state machine that walks a player
//! from handshake to character selection, and the client views of the
//! distributed classes the servers publish.
//!
//! ## Connection flow
//!
//! After the transport comes up the client sends its hello (schema hash and
//! version). Once the Client Agent acknowledges it, the heartbeat starts, the
//! global login manager is generated and the configured credentials are
//! sent. A successful login makes the UberDOG open the base interest on the
//! game root's shard zone; when that interest has delivered its objects the
//! client either moves on to character selection or, without any available
//! shard, reports that there are no servers.
//!
//! Ejects, lost connections and failed connects all end in a single
//! connection failure. Dismissing it exits or reconnects depending on the
//! configured failure policy.
//!
//! ## Module Organization
//!
//! - `repository`: message decoding, object table, shard directory, interest
//!   bookkeeping and the [`ClientEvent`] queue.
//! - `state`: the [`ConnectionStateMachine`].
//! - `login`, `shard`: client views of `LoginManager` and
//!   `DistributedShardServer`.
//! - `interface`: hooks for presenting messages to the player.
//! - `network`: tokio driver owning the TCP connection and the heartbeat.

pub mod error;
pub mod interface;
pub mod login;
pub mod network;
pub mod repository;
pub mod shard;
pub mod state;

pub use error::ClientError;
pub use interface::{ClientInterface, LogInterface, RecordingInterface};
pub use network::Client;
pub use repository::{ClientEvent, ClientRepository};
pub use state::{ConnectionState, ConnectionStateMachine, Directive};
