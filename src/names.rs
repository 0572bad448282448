//! Names of the three relay objects

/// Size of the relay slot in bytes
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Well-known event a producer waits on before writing
pub const DBWIN_BUFFER_READY: &str = "DBWIN_BUFFER_READY";
/// Well-known event a producer sets after writing
pub const DBWIN_DATA_READY: &str = "DBWIN_DATA_READY";
/// Well-known shared segment holding one message
pub const DBWIN_BUFFER: &str = "DBWIN_BUFFER";

/// The names a relay is published under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayNames {
    pub buffer_ready: String,
    pub data_ready: String,
    pub buffer: String,
}

impl Default for RelayNames {
    fn default() -> Self {
        Self {
            buffer_ready: DBWIN_BUFFER_READY.to_string(),
            data_ready: DBWIN_DATA_READY.to_string(),
            buffer: DBWIN_BUFFER.to_string(),
        }
    }
}

impl RelayNames {
    /// A private relay: `<prefix>_BUFFER_READY`, `<prefix>_DATA_READY`, `<prefix>_BUFFER`
    ///
    /// `with_prefix("DBWIN")` yields the well-known names.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            buffer_ready: format!("{prefix}_BUFFER_READY"),
            data_ready: format!("{prefix}_DATA_READY"),
            buffer: format!("{prefix}_BUFFER"),
        }
    }

    /// All three names, events first
    pub fn all(&self) -> [&str; 3] {
        [&self.buffer_ready, &self.data_ready, &self.buffer]
    }
}
