//! The single-slot shared relay buffer

use crate::error::{RelayError, Result};
use crate::names::RELAY_BUFFER_SIZE;
use crate::sys::SharedSegment;

/// Listener view of the relay slot. Read-only: producers own the writes.
pub struct SharedRelayBuffer {
    segment: SharedSegment,
}

impl SharedRelayBuffer {
    /// Create the slot; an existing name yields [`RelayError::AlreadyRunning`]
    pub fn create(name: &str) -> Result<Self> {
        let segment = SharedSegment::create(name, RELAY_BUFFER_SIZE)
            .map_err(|e| RelayError::from_create(name, e))?;
        Ok(Self { segment })
    }

    /// Snapshot of the whole slot
    pub fn read_all(&self) -> [u8; RELAY_BUFFER_SIZE] {
        let mut buf = [0u8; RELAY_BUFFER_SIZE];
        self.segment.read_into(&mut buf);
        buf
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }
}
