//! Windows backend: kernel event objects and a pagefile-backed file mapping
//!
//! These are the objects native `OutputDebugString` producers look for.

use std::ffi::c_void;
use std::io;
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0,
    WAIT_TIMEOUT,
};
use windows_sys::Win32::Security::{
    InitializeSecurityDescriptor, SetSecurityDescriptorDacl, SECURITY_ATTRIBUTES,
    SECURITY_DESCRIPTOR,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_READ,
    FILE_MAP_WRITE, MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemServices::SECURITY_DESCRIPTOR_REVISION;
use windows_sys::Win32::System::Threading::{
    CreateEventW, OpenEventW, SetEvent, WaitForSingleObject, EVENT_MODIFY_STATE,
    SYNCHRONIZATION_SYNCHRONIZE,
};

fn wide(name: &str) -> io::Result<Vec<u16>> {
    if name.is_empty() || name.contains('\0') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid relay object name '{name}'"),
        ));
    }
    Ok(name.encode_utf16().chain(std::iter::once(0)).collect())
}

/// Security attributes with a NULL DACL, i.e. access for everyone
struct WorldAccess {
    descriptor: Box<SECURITY_DESCRIPTOR>,
}

impl WorldAccess {
    fn new() -> io::Result<Self> {
        // SAFETY: SECURITY_DESCRIPTOR is plain data and is initialised below
        let mut descriptor: Box<SECURITY_DESCRIPTOR> = Box::new(unsafe { std::mem::zeroed() });
        let psd = ptr::addr_of_mut!(*descriptor).cast::<c_void>();
        unsafe {
            if InitializeSecurityDescriptor(psd, SECURITY_DESCRIPTOR_REVISION) == 0 {
                return Err(io::Error::last_os_error());
            }
            if SetSecurityDescriptorDacl(psd, 1, ptr::null(), 0) == 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(Self { descriptor })
    }

    fn attributes(&mut self) -> SECURITY_ATTRIBUTES {
        SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: ptr::addr_of_mut!(*self.descriptor).cast::<c_void>(),
            bInheritHandle: 0,
        }
    }
}

/// Owned kernel handle
struct Handle(HANDLE);

// SAFETY: kernel handles may be used from any thread
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    /// Wrap the result of a create call, rejecting null and "opened existing"
    fn created(raw: HANDLE) -> io::Result<Self> {
        if raw.is_null() {
            return Err(io::Error::last_os_error());
        }
        let handle = Handle(raw);
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists));
        }
        Ok(handle)
    }

    fn opened(raw: HANDLE) -> io::Result<Self> {
        if raw.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Handle(raw))
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Named auto-reset event
pub struct NamedEvent {
    handle: Handle,
    name: String,
}

impl NamedEvent {
    /// Create a fresh event, initially unset
    pub fn create(name: &str) -> io::Result<Self> {
        let wide_name = wide(name)?;
        let mut access = WorldAccess::new()?;
        let attributes = access.attributes();
        let raw = unsafe { CreateEventW(&attributes, 0, 0, wide_name.as_ptr()) };
        Ok(Self {
            handle: Handle::created(raw)?,
            name: name.to_string(),
        })
    }

    /// Open an event owned by another process
    pub fn open(name: &str) -> io::Result<Self> {
        let wide_name = wide(name)?;
        let raw = unsafe {
            OpenEventW(
                EVENT_MODIFY_STATE | SYNCHRONIZATION_SYNCHRONIZE,
                0,
                wide_name.as_ptr(),
            )
        };
        Ok(Self {
            handle: Handle::opened(raw)?,
            name: name.to_string(),
        })
    }

    /// Set the event; the kernel releases at most one waiter
    pub fn set(&self) -> io::Result<()> {
        if unsafe { SetEvent(self.handle.0) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait up to `timeout` for the event, consuming it on success
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        match unsafe { WaitForSingleObject(self.handle.0, millis) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Named fixed-size shared memory segment
pub struct SharedSegment {
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    // Dropped after the view is unmapped
    _mapping: Handle,
    size: usize,
    name: String,
}

// SAFETY: the view is plain shared bytes ordered by the relay handshake
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create a fresh zero-filled segment
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        let wide_name = wide(name)?;
        let mut access = WorldAccess::new()?;
        let attributes = access.attributes();
        let raw = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                &attributes,
                PAGE_READWRITE,
                0,
                size as u32,
                wide_name.as_ptr(),
            )
        };
        let mapping = Handle::created(raw)?;
        Self::map(mapping, name, size)
    }

    /// Open a segment owned by another process
    pub fn open(name: &str, size: usize) -> io::Result<Self> {
        let wide_name = wide(name)?;
        let raw =
            unsafe { OpenFileMappingW(FILE_MAP_READ | FILE_MAP_WRITE, 0, wide_name.as_ptr()) };
        let mapping = Handle::opened(raw)?;
        Self::map(mapping, name, size)
    }

    fn map(mapping: Handle, name: &str, size: usize) -> io::Result<Self> {
        let view = unsafe { MapViewOfFile(mapping.0, FILE_MAP_READ | FILE_MAP_WRITE, 0, 0, size) };
        if view.Value.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            view,
            _mapping: mapping,
            size,
            name: name.to_string(),
        })
    }

    /// Copy the first `buf.len()` bytes of the segment into `buf`
    pub fn read_into(&self, buf: &mut [u8]) {
        let len = buf.len().min(self.size);
        unsafe {
            ptr::copy_nonoverlapping(self.view.Value.cast::<u8>(), buf.as_mut_ptr(), len);
        }
    }

    /// Copy `data` to the start of the segment
    pub fn write_from(&self, data: &[u8]) {
        let len = data.len().min(self.size);
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.view.Value.cast::<u8>(), len);
        }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        unsafe {
            UnmapViewOfFile(self.view);
        }
    }
}
