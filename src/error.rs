//! Error types for the DBWIN relay

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while owning or feeding the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Another listener already owns the named relay objects
    #[error("Some DBWIN listener is already running ('{name}' exists)")]
    AlreadyRunning { name: String },

    /// Any other failure while creating a relay object
    #[error("Failed to create relay object '{name}': {source}")]
    Setup {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The relay objects do not exist, so nobody is listening
    #[error("No listener owns relay object '{name}': {source}")]
    NoListener {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A signal did not arrive in time
    #[error("Timed out after {waited:?} waiting for '{name}'")]
    Timeout { name: String, waited: Duration },

    /// Signalling a relay event failed mid-session
    #[error("Failed to signal '{name}': {source}")]
    Signal {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The sink refused a line
    #[error("Sink write failed: {0}")]
    Sink(#[source] io::Error),
}

impl RelayError {
    /// Map a creation error, turning "name exists" into [`RelayError::AlreadyRunning`]
    pub(crate) fn from_create(name: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AlreadyExists {
            RelayError::AlreadyRunning {
                name: name.to_string(),
            }
        } else {
            RelayError::Setup {
                name: name.to_string(),
                source,
            }
        }
    }

    /// Whether this error means another listener is active
    pub fn is_already_running(&self) -> bool {
        matches!(self, RelayError::AlreadyRunning { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_maps_to_already_running() {
        let err = RelayError::from_create(
            "DBWIN_BUFFER_READY",
            io::Error::from(io::ErrorKind::AlreadyExists),
        );
        assert!(err.is_already_running());
        assert!(err.to_string().contains("DBWIN_BUFFER_READY"));

        let err = RelayError::from_create(
            "DBWIN_BUFFER",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, RelayError::Setup { .. }));
    }
}
