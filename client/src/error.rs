//! Error types for the game client.

use shared::{ConfigError, DatagramError, ObjectError, SchemaError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("malformed message: {0}")]
    Datagram(#[from] DatagramError),

    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// True when the Client Agent connection is gone, as opposed to a
    /// fault in this process.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::Object(ObjectError::Disconnected) | ClientError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_told_apart() {
        assert!(ClientError::from(ObjectError::Disconnected).is_connection_error());
        assert!(ClientError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .is_connection_error());
        assert!(!ClientError::from(ObjectError::NotGenerated).is_connection_error());
        assert!(!ClientError::from(ConfigError::AlreadyInstantiated("ClientRepository"))
            .is_connection_error());
    }
}
