//! dbwin-relay - listener for the DBWIN debug-output relay
//!
//! Processes publish diagnostic strings through a machine-wide relay made of
//! two named auto-reset events and one 4096-byte shared segment. At most one
//! listener may own the relay; this crate is that listener.
//!
//! # Architecture
//!
//! - **Producers** (any process): wait for "buffer ready", write
//!   `pid + text\0` into the slot, set "data ready"
//! - **Listener** ([`RelaySession`]): waits for "data ready", decodes and
//!   filters the slot, hands accepted lines to a [`Sink`], sets "buffer ready"
//!
//! The slot holds one message at a time, so messages arrive in the order
//! producers deposit them.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod names;
pub mod producer;
pub mod session;
pub mod signal;
pub mod sink;
pub mod sys;

pub use codec::{DecodedMessage, TextEncoding};
pub use config::{ConfigError, ListenerConfig};
pub use error::{RelayError, Result};
pub use filter::FilterChain;
pub use names::{RelayNames, RELAY_BUFFER_SIZE};
pub use producer::RelayProducer;
pub use session::{RelaySession, SessionConfig, SessionState};
pub use sink::{ConsoleSink, FileSink, Sink, Status, TeeSink};
