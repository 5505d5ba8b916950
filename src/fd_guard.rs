use std::{
    os::unix::io::RawFd,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
};

use tracing::{
    debug,
    warn,
};

use crate::error::{
    self,
    Error,
    Operation,
};
use crate::gateway::SyscallGateway;


/// Owns an inotify file descriptor
///
/// The descriptor is released exactly once, either by [`FdGuard::close`] or
/// when the guard is dropped. After that, [`FdGuard::fd`] refuses to hand
/// out the number, because the kernel may already have recycled it.
#[derive(Debug)]
pub(crate) struct FdGuard {
    fd: RawFd,
    open: AtomicBool,
    gateway: Arc<dyn SyscallGateway>,
}

impl FdGuard {
    pub(crate) fn new(fd: RawFd, gateway: Arc<dyn SyscallGateway>) -> Self {
        FdGuard {
            fd,
            open: AtomicBool::new(true),
            gateway,
        }
    }

    /// Returns the descriptor for use in `operation`, if it hasn't been
    /// closed yet
    pub(crate) fn fd(&self, operation: Operation) -> Result<RawFd, Error> {
        if self.open.load(Ordering::Acquire) {
            Ok(self.fd)
        }
        else {
            Err(Error::closed(operation))
        }
    }

    /// Returns the descriptor number, whether or not it is still open
    pub(crate) fn raw(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn gateway(&self) -> &dyn SyscallGateway {
        &*self.gateway
    }

    /// Releases the descriptor
    ///
    /// Only the first call reaches the kernel. Later calls fail with
    /// [`Error::InvalidDescriptor`].
    pub(crate) fn close(&self) -> Result<(), Error> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Err(Error::closed(Operation::Close));
        }

        debug!(fd = self.fd, "closing inotify channel");
        self.gateway
            .close(self.fd)
            .map_err(|source| error::classify(Operation::Close, source))
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(fd = self.fd, "closing inotify channel on drop");
            if let Err(error) = self.gateway.close(self.fd) {
                warn!(fd = self.fd, %error, "failed to close inotify channel");
            }
        }
    }
}
