//! POSIX backend: every relay object is a POSIX shared memory object
//!
//! The slot is a plain mapping. An event is a single shared `AtomicU32`
//! (0 = unset, 1 = set) that waiters consume with a compare-exchange.

use rustix::fd::OwnedFd;
use rustix::fs::{fchmod, fstat, ftruncate};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// NAME_MAX minus the leading slash, with some headroom
const MAX_NAME_LEN: usize = 250;

const UNSET: u32 = 0;
const SET: u32 = 1;

/// Busy spins before a waiter starts sleeping
const SPIN_LIMIT: u32 = 128;
/// Sleep step of a waiting event
const POLL_INTERVAL: Duration = Duration::from_millis(1);

fn world_rw() -> Mode {
    Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH | Mode::WOTH
}

fn object_name(name: &str) -> io::Result<CString> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid relay object name '{name}'"),
        ));
    }
    CString::new(format!("/{name}")).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("relay object name '{name}' contains NUL"),
        )
    })
}

/// Remove a relay object left behind by a listener that died without cleanup
pub fn unlink(name: &str) -> io::Result<()> {
    let c_name = object_name(name)?;
    shm_unlink(c_name.as_c_str())?;
    Ok(())
}

/// A mapped POSIX shared memory object
struct Mapping {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping is plain shared bytes; every concurrent access goes
// through atomics or is ordered by the relay handshake
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Create the object exclusively; an existing name yields `AlreadyExists`
    fn create(name: &str, size: usize) -> io::Result<Self> {
        let c_name = object_name(name)?;
        let fd = shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            world_rw(),
        )?;

        // From here on the name is ours; take it back out if sizing fails
        let mapped = fchmod(&fd, world_rw())
            .and_then(|()| ftruncate(&fd, size as u64))
            .map_err(io::Error::from)
            .and_then(|()| Self::map(&fd, size));

        match mapped {
            Ok(addr) => Ok(Self {
                fd,
                addr,
                size,
                name: name.to_string(),
                is_owner: true,
            }),
            Err(e) => {
                let _ = shm_unlink(c_name.as_c_str());
                Err(e)
            }
        }
    }

    /// Open an object some other process created
    fn open(name: &str, size: usize) -> io::Result<Self> {
        let c_name = object_name(name)?;
        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty())?;

        let stat = fstat(&fd)?;
        let actual = usize::try_from(stat.st_size).unwrap_or(0);
        if actual < size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("'{name}' is {actual} bytes, need {size}"),
            ));
        }

        let addr = Self::map(&fd, size)?;
        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    fn map(fd: &OwnedFd, size: usize) -> io::Result<NonNull<u8>> {
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd,
                0,
            )?
        };
        NonNull::new(addr.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }

        if self.is_owner {
            if let Ok(c_name) = object_name(&self.name) {
                let _ = shm_unlink(c_name.as_c_str());
            }
        }
    }
}

/// Named auto-reset event
pub struct NamedEvent {
    mapping: Mapping,
}

impl NamedEvent {
    /// Create a fresh event, initially unset
    pub fn create(name: &str) -> io::Result<Self> {
        let mapping = Mapping::create(name, std::mem::size_of::<AtomicU32>())?;
        Ok(Self { mapping })
    }

    /// Open an event owned by another process
    pub fn open(name: &str) -> io::Result<Self> {
        let mapping = Mapping::open(name, std::mem::size_of::<AtomicU32>())?;
        Ok(Self { mapping })
    }

    #[inline(always)]
    fn state(&self) -> &AtomicU32 {
        // SAFETY: the mapping is page aligned and at least four bytes long
        unsafe { &*self.mapping.addr.as_ptr().cast::<AtomicU32>() }
    }

    /// Set the event; at most one waiter consumes it
    pub fn set(&self) -> io::Result<()> {
        self.state().store(SET, Ordering::Release);
        Ok(())
    }

    /// Wait up to `timeout` for the event, consuming it on success
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut spins = 0u32;

        loop {
            if self
                .state()
                .compare_exchange(SET, UNSET, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                core::hint::spin_loop();
            } else {
                std::thread::sleep(POLL_INTERVAL.min(deadline - now));
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.mapping.name
    }
}

/// Named fixed-size shared memory segment
pub struct SharedSegment {
    mapping: Mapping,
}

impl SharedSegment {
    /// Create a fresh zero-filled segment
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        Ok(Self {
            mapping: Mapping::create(name, size)?,
        })
    }

    /// Open a segment owned by another process
    pub fn open(name: &str, size: usize) -> io::Result<Self> {
        Ok(Self {
            mapping: Mapping::open(name, size)?,
        })
    }

    /// Copy the first `buf.len()` bytes of the segment into `buf`
    pub fn read_into(&self, buf: &mut [u8]) {
        let len = buf.len().min(self.mapping.size);
        unsafe {
            std::ptr::copy_nonoverlapping(self.mapping.addr.as_ptr(), buf.as_mut_ptr(), len);
        }
    }

    /// Copy `data` to the start of the segment
    pub fn write_from(&self, data: &[u8]) {
        let len = data.len().min(self.mapping.size);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapping.addr.as_ptr(), len);
        }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.mapping.size
    }

    pub fn name(&self) -> &str {
        &self.mapping.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        format!("dbwsys_{}_{}", std::process::id(), tag)
    }

    #[test]
    fn test_create_is_exclusive() {
        let name = unique("excl");
        let first = SharedSegment::create(&name, 4096).unwrap();
        let err = SharedSegment::create(&name, 4096).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        drop(first);
        // Owner drop unlinks, so the name is free again
        let again = SharedSegment::create(&name, 4096).unwrap();
        assert_eq!(again.size(), 4096);
    }

    #[test]
    fn test_segment_is_shared() {
        let name = unique("shared");
        let owner = SharedSegment::create(&name, 4096).unwrap();
        let other = SharedSegment::open(&name, 4096).unwrap();

        other.write_from(b"hello");
        let mut buf = [0u8; 8];
        owner.read_into(&mut buf);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(&buf[5..], &[0, 0, 0]);

        drop(other);
        drop(owner);
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let err = NamedEvent::open(&unique("missing")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_event_auto_resets() {
        let name = unique("event");
        let event = NamedEvent::create(&name).unwrap();
        let remote = NamedEvent::open(&name).unwrap();

        assert!(!event.wait_timeout(Duration::from_millis(5)).unwrap());
        remote.set().unwrap();
        assert!(event.wait_timeout(Duration::from_millis(5)).unwrap());
        // Consumed by the first wait
        assert!(!event.wait_timeout(Duration::from_millis(5)).unwrap());
    }

    #[test]
    fn test_invalid_names() {
        assert!(object_name("").is_err());
        assert!(object_name("a/b").is_err());
        assert!(object_name("a\0b").is_err());
        assert!(object_name("DBWIN_BUFFER").is_ok());
    }
}
