//! Error types for the internal repository.

use shared::{AllocatorError, ConfigError, DatagramError, ObjectError, SchemaError};

/// Errors raised while running an AI or UberDOG repository.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("malformed datagram: {0}")]
    Datagram(#[from] DatagramError),

    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("channel allocation failed: {0}")]
    Allocator(#[from] AllocatorError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Explicit shutdown request; never swallowed by the poll loop.
    #[error("shutdown requested")]
    Shutdown,
}
