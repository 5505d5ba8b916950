//! Boundary between this crate and the kernel
//!
//! Every system call the crate makes goes through [`SyscallGateway`]. The
//! OS-backed implementation is [`SystemGateway`]; tests use an in-crate fake
//! that simulates the kernel's event queue.

use std::{
    ffi::CStr,
    fmt,
    io,
    os::raw::{
        c_int,
        c_void,
    },
    os::unix::io::RawFd,
};

use inotify_sys as ffi;
use libc::{
    F_GETFL,
    F_SETFL,
    FIONREAD,
    O_NONBLOCK,
};


/// A control request issued against an open descriptor
///
/// This is the crate's equivalent of a generic `ioctl`. Only the requests the
/// crate actually needs are modeled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlRequest {
    /// Ask how many bytes of events are queued (`ioctl(FIONREAD)`)
    ///
    /// The answer is a hint. Some kernel configurations report `0` even
    /// though an event is ready.
    PendingBytes,

    /// Switch `O_NONBLOCK` on (`true`) or off (`false`)
    SetNonBlocking(bool),
}

/// The raw system calls behind a notification channel
///
/// Errors are reported as [`io::Error`]s built from the OS error code, so
/// the raw errno is always available via [`io::Error::raw_os_error`].
pub trait SyscallGateway: fmt::Debug + Send + Sync {
    /// Creates a new inotify instance (`inotify_init1`)
    fn create_channel(&self, flags: c_int) -> io::Result<RawFd>;

    /// Adds or updates a watch (`inotify_add_watch`)
    fn add_watch(&self, fd: RawFd, path: &CStr, mask: u32)
        -> io::Result<c_int>;

    /// Removes a watch (`inotify_rm_watch`)
    fn remove_watch(&self, fd: RawFd, wd: c_int) -> io::Result<()>;

    /// Reads raw event records into `buffer` (`read`)
    fn read_bytes(&self, fd: RawFd, buffer: &mut [u8]) -> io::Result<usize>;

    /// Issues a control request
    ///
    /// Returns the pending byte count for [`ControlRequest::PendingBytes`],
    /// and `0` for requests that carry no result.
    fn control(&self, fd: RawFd, request: ControlRequest) -> io::Result<c_int>;

    /// Releases the descriptor (`close`)
    fn close(&self, fd: RawFd) -> io::Result<()>;
}


/// Gateway that performs the real system calls
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemGateway;

impl SystemGateway {
    /// Creates a gateway to the running kernel
    pub fn new() -> Self {
        SystemGateway
    }
}

fn check(result: c_int) -> io::Result<c_int> {
    match result {
        -1 => Err(io::Error::last_os_error()),
        _  => Ok(result),
    }
}

impl SyscallGateway for SystemGateway {
    fn create_channel(&self, flags: c_int) -> io::Result<RawFd> {
        check(unsafe { ffi::inotify_init1(flags) })
    }

    fn add_watch(&self, fd: RawFd, path: &CStr, mask: u32)
        -> io::Result<c_int>
    {
        check(unsafe { ffi::inotify_add_watch(fd, path.as_ptr(), mask) })
    }

    fn remove_watch(&self, fd: RawFd, wd: c_int) -> io::Result<()> {
        check(unsafe { ffi::inotify_rm_watch(fd, wd) }).map(|_| ())
    }

    fn read_bytes(&self, fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
        let len = unsafe {
            libc::read(
                fd,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len(),
            )
        };

        if len < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(len as usize)
    }

    fn control(&self, fd: RawFd, request: ControlRequest) -> io::Result<c_int> {
        match request {
            ControlRequest::PendingBytes => {
                let mut pending: c_int = 0;
                check(unsafe { libc::ioctl(fd, FIONREAD, &mut pending) })?;
                Ok(pending)
            }
            ControlRequest::SetNonBlocking(nonblocking) => {
                let flags = check(unsafe { libc::fcntl(fd, F_GETFL) })?;
                let flags = if nonblocking {
                    flags | O_NONBLOCK
                }
                else {
                    flags & !O_NONBLOCK
                };
                check(unsafe { libc::fcntl(fd, F_SETFL, flags) }).map(|_| 0)
            }
        }
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        check(unsafe { libc::close(fd) }).map(|_| ())
    }
}
