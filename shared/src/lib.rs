//! # Quest shared library
//!
//! Types and codecs shared by the game client and the AI / UberDOG server
//! processes: the middleware datagram codec and message catalogue, the
//! class schema, the distributed object model, channel allocation, shard
//! bookkeeping and startup configuration.

pub mod channel;
pub mod config;
pub mod constants;
pub mod datagram;
pub mod error;
pub mod field;
pub mod object;
pub mod protocol;
pub mod schema;
pub mod shard;
pub mod singleton;
pub mod transport;

pub use channel::{ChannelAllocator, ChannelId, DoId, ZoneId};
pub use datagram::{Datagram, DatagramIterator};
pub use error::{
    AllocatorError, ConfigError, DatagramError, FieldError, ObjectError, SchemaError,
};
pub use field::{FieldArgs, FieldValue};
pub use object::{
    ClassRegistry, DistributedClass, DistributedObject, FieldHandler, FieldSink, ObjectCore,
    ObjectLocation, ObjectTable,
};
pub use protocol::{ClientMessage, InternalDatagram, InternalMessage};
pub use schema::Schema;
pub use shard::{ShardDescriptor, ShardDirectory};
