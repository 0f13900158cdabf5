//! Error types for the shared distributed-object layer.
//!
//! Each concern gets its own enum so callers can tell network-boundary
//! failures (which are logged and survived) apart from configuration
//! failures (which must stop startup).

use crate::channel::{ChannelId, DoId};

/// Errors raised while reading or writing middleware datagrams.
#[derive(Debug, thiserror::Error)]
pub enum DatagramError {
    #[error("datagram truncated: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        needed: usize,
        offset: usize,
        remaining: usize,
    },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("value of {0} bytes does not fit a 16-bit length prefix")]
    TooLong(usize),

    #[error("{count} entries exceed the limit of {max}")]
    TooManyEntries { count: usize, max: usize },

    #[error("unknown message type {0}")]
    UnknownMessage(u16),

    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    #[error("bad field arguments: {0}")]
    FieldArgs(#[from] FieldError),
}

/// Errors raised by the channel allocator.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AllocatorError {
    #[error("channel range {min}..={max} is exhausted")]
    Exhausted { min: ChannelId, max: ChannelId },

    #[error("channel {0} is outside the allocator range")]
    OutOfRange(ChannelId),

    #[error("channel {0} is not currently allocated")]
    NotAllocated(ChannelId),

    #[error("allocator range {min}..={max} is empty")]
    EmptyRange { min: ChannelId, max: ChannelId },
}

/// Errors raised while registering classes against the shared schema.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("class {0} is not declared in the schema")]
    UnknownClass(String),

    #[error("field {class}.{field} is not declared in the schema")]
    UnknownField { class: String, field: String },

    #[error("class {0} is registered twice")]
    DuplicateClass(String),
}

/// Errors raised while encoding or reading positional field arguments.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("missing argument {index}")]
    Missing { index: usize },

    #[error("argument {index} should be {expected} but is {found}")]
    WrongType {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("failed to encode field arguments: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Errors raised by distributed objects and the repositories that own them.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("object is already generated as {0}")]
    AlreadyGenerated(DoId),

    #[error("object has not been generated")]
    NotGenerated,

    #[error("global singleton {class} is already generated")]
    DuplicateSingleton { class: String },

    #[error("object id {0} is already in use")]
    DuplicateObject(DoId),

    #[error("no live object with id {0}")]
    UnknownObject(DoId),

    #[error("class {0} is not registered")]
    UnknownClass(String),

    #[error("class {class} has no handler for field {field}")]
    UnknownField { class: String, field: String },

    #[error("bad arguments for field {field}: {source}")]
    BadArguments {
        field: String,
        #[source]
        source: FieldError,
    },

    #[error("failed to build datagram: {0}")]
    Encoding(#[from] DatagramError),

    #[error("connection is closed")]
    Disconnected,

    #[error("{0}")]
    Handler(String),
}

/// Errors raised while resolving startup configuration.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("startup variable {key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{0} is already instantiated in this process")]
    AlreadyInstantiated(&'static str),
}
