//! Platform backends for the named relay objects
//!
//! Both backends expose the same surface: `NamedEvent` (auto-reset, created
//! exclusively, world accessible) and `SharedSegment` (fixed size, world
//! read/write). Exclusive creation reports an existing name as
//! `io::ErrorKind::AlreadyExists`.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{unlink, NamedEvent, SharedSegment};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::{NamedEvent, SharedSegment};
