//! Producer side of the relay handshake
//!
//! Mirrors what `OutputDebugString` does: wait for the slot, fill it, then
//! tell the listener.

use crate::codec::{encode, TextEncoding};
use crate::error::{RelayError, Result};
use crate::names::{RelayNames, RELAY_BUFFER_SIZE};
use crate::sys::{NamedEvent, SharedSegment};
use std::io;
use std::time::Duration;

/// How long `OutputDebugString` waits for a busy slot
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Our own pid as the slot stores it; ids past `i32::MAX` saturate
pub fn current_pid() -> i32 {
    i32::try_from(std::process::id()).unwrap_or(i32::MAX)
}

/// Handle to a running listener's relay objects
pub struct RelayProducer {
    buffer_ready: NamedEvent,
    data_ready: NamedEvent,
    buffer: SharedSegment,
    encoding: TextEncoding,
}

fn open_error(name: &str, source: io::Error) -> RelayError {
    if source.kind() == io::ErrorKind::NotFound {
        RelayError::NoListener {
            name: name.to_string(),
            source,
        }
    } else {
        RelayError::Setup {
            name: name.to_string(),
            source,
        }
    }
}

impl RelayProducer {
    /// Open the relay; fails with [`RelayError::NoListener`] if nobody owns it
    pub fn open(names: &RelayNames, encoding: TextEncoding) -> Result<Self> {
        let buffer_ready = NamedEvent::open(&names.buffer_ready)
            .map_err(|e| open_error(&names.buffer_ready, e))?;
        let data_ready =
            NamedEvent::open(&names.data_ready).map_err(|e| open_error(&names.data_ready, e))?;
        let buffer = SharedSegment::open(&names.buffer, RELAY_BUFFER_SIZE)
            .map_err(|e| open_error(&names.buffer, e))?;

        Ok(Self {
            buffer_ready,
            data_ready,
            buffer,
            encoding,
        })
    }

    /// Deposit one message, waiting up to `timeout` for the slot
    pub fn send(&self, process_id: i32, text: &str, timeout: Duration) -> Result<()> {
        let ready = self
            .buffer_ready
            .wait_timeout(timeout)
            .map_err(|source| RelayError::Signal {
                name: self.buffer_ready.name().to_string(),
                source,
            })?;
        if !ready {
            return Err(RelayError::Timeout {
                name: self.buffer_ready.name().to_string(),
                waited: timeout,
            });
        }

        self.buffer.write_from(&encode(process_id, text, self.encoding));

        self.data_ready.set().map_err(|source| RelayError::Signal {
            name: self.data_ready.name().to_string(),
            source,
        })
    }
}
