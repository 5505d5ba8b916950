//! Error types and the mapping from raw OS errors to them
//!
//! The generic OS message for an errno is often unhelpful for inotify (a
//! bare "No space left on device" from `inotify_add_watch` means the watch
//! limit was hit, not that a disk is full). [`classify`] attaches a
//! diagnostic that is specific to the failing call.

use std::{
    borrow::Cow,
    fmt,
    io,
};

use libc::{
    EACCES,
    EBADF,
    EINVAL,
    EMFILE,
    ENFILE,
    ENOMEM,
    ENOSPC,
    EPERM,
};
use thiserror::Error;

use crate::events::DecodeError;


/// The system call that failed
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// Opening a channel (`inotify_init1`)
    Open,
    /// Adding or updating a watch (`inotify_add_watch`)
    AddWatch,
    /// Removing a watch (`inotify_rm_watch`)
    RemoveWatch,
    /// Reading events (`read`)
    Read,
    /// Querying the number of pending bytes (`ioctl(FIONREAD)`)
    PendingBytes,
    /// Toggling blocking mode (`fcntl(F_SETFL)`)
    SetBlocking,
    /// Closing the channel (`close`)
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Open         => "inotify_init1",
            Operation::AddWatch     => "inotify_add_watch",
            Operation::RemoveWatch  => "inotify_rm_watch",
            Operation::Read         => "read",
            Operation::PendingBytes => "ioctl(FIONREAD)",
            Operation::SetBlocking  => "fcntl(F_SETFL)",
            Operation::Close        => "close",
        };
        f.write_str(name)
    }
}


/// The closed set of failure categories
///
/// "Would block" is deliberately absent. A non-blocking read with nothing
/// queued returns an empty list of events instead of an error.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// A per-user or system-wide instance, watch or descriptor limit
    ResourceLimit,
    /// The kernel could not allocate memory
    KernelMemory,
    /// Access to the path was denied
    Permission,
    /// The channel's descriptor is not valid (or was already closed)
    InvalidDescriptor,
    /// Bad mask, not an inotify descriptor, or unknown watch descriptor
    InvalidArgument,
    /// The event buffer was malformed
    Decode,
    /// Any other OS error
    Os,
}


/// An error from one of the channel's operations
#[derive(Debug, Error)]
pub enum Error {
    /// See [`ErrorKind::ResourceLimit`]
    #[error("{operation}: {message}")]
    ResourceLimit {
        /// The call that failed
        operation: Operation,
        /// Diagnostic specific to `operation`
        message: Cow<'static, str>,
        /// The underlying OS error
        #[source]
        source: io::Error,
    },

    /// See [`ErrorKind::KernelMemory`]
    #[error("{operation}: {message}")]
    KernelMemory {
        /// The call that failed
        operation: Operation,
        /// Diagnostic specific to `operation`
        message: Cow<'static, str>,
        /// The underlying OS error
        #[source]
        source: io::Error,
    },

    /// See [`ErrorKind::Permission`]
    #[error("{operation}: {message}")]
    Permission {
        /// The call that failed
        operation: Operation,
        /// Diagnostic specific to `operation`
        message: Cow<'static, str>,
        /// The underlying OS error
        #[source]
        source: io::Error,
    },

    /// See [`ErrorKind::InvalidDescriptor`]
    ///
    /// `source` is `None` if the channel was already closed on our side and
    /// the kernel was never asked.
    #[error("{operation}: {message}")]
    InvalidDescriptor {
        /// The call that failed
        operation: Operation,
        /// Diagnostic specific to `operation`
        message: Cow<'static, str>,
        /// The underlying OS error, if any
        #[source]
        source: Option<io::Error>,
    },

    /// See [`ErrorKind::InvalidArgument`]
    ///
    /// `source` is `None` if the argument was rejected before reaching the
    /// kernel.
    #[error("{operation}: {message}")]
    InvalidArgument {
        /// The call that failed
        operation: Operation,
        /// Diagnostic specific to `operation`
        message: Cow<'static, str>,
        /// The underlying OS error, if any
        #[source]
        source: Option<io::Error>,
    },

    /// See [`ErrorKind::Decode`]
    #[error("malformed event buffer: {0}")]
    Decode(#[from] DecodeError),

    /// See [`ErrorKind::Os`]
    #[error("{operation}: {source}")]
    Os {
        /// The call that failed
        operation: Operation,
        /// The underlying OS error
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Returns the category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ResourceLimit { .. }     => ErrorKind::ResourceLimit,
            Error::KernelMemory { .. }      => ErrorKind::KernelMemory,
            Error::Permission { .. }        => ErrorKind::Permission,
            Error::InvalidDescriptor { .. } => ErrorKind::InvalidDescriptor,
            Error::InvalidArgument { .. }   => ErrorKind::InvalidArgument,
            Error::Decode(_)                => ErrorKind::Decode,
            Error::Os { .. }                => ErrorKind::Os,
        }
    }

    /// Returns the operation that failed
    pub fn operation(&self) -> Operation {
        match self {
            Error::ResourceLimit { operation, .. }
            | Error::KernelMemory { operation, .. }
            | Error::Permission { operation, .. }
            | Error::InvalidDescriptor { operation, .. }
            | Error::InvalidArgument { operation, .. }
            | Error::Os { operation, .. } => *operation,
            Error::Decode(_) => Operation::Read,
        }
    }

    /// Returns the raw errno, if the error came from the kernel
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::ResourceLimit { source, .. }
            | Error::KernelMemory { source, .. }
            | Error::Permission { source, .. }
            | Error::Os { source, .. } => source.raw_os_error(),
            Error::InvalidDescriptor { source, .. }
            | Error::InvalidArgument { source, .. } => {
                source.as_ref().and_then(io::Error::raw_os_error)
            }
            Error::Decode(_) => None,
        }
    }

    /// Indicates whether this is an [`ErrorKind::InvalidArgument`] error
    ///
    /// Removing a watch the kernel already dropped on its own (after the
    /// watched file was deleted, or after a one-shot event) produces such
    /// an error. It is an expected outcome, not a fault.
    pub fn is_invalid_argument(&self) -> bool {
        self.kind() == ErrorKind::InvalidArgument
    }

    pub(crate) fn closed(operation: Operation) -> Self {
        Error::InvalidDescriptor {
            operation,
            message: Cow::Borrowed("the channel has already been closed"),
            source: None,
        }
    }

    pub(crate) fn rejected(operation: Operation, message: &'static str)
        -> Self
    {
        Error::InvalidArgument {
            operation,
            message: Cow::Borrowed(message),
            source: None,
        }
    }
}


fn diagnostic(operation: Operation, code: i32) -> Option<&'static str> {
    use self::Operation::*;

    let message = match (operation, code) {
        (Open, EMFILE) =>
            "the user limit on the total number of inotify instances has \
            been reached",
        (Open, ENFILE) =>
            "the system-wide limit on the total number of open files has \
            been reached",
        (Open, ENOMEM) | (AddWatch, ENOMEM) =>
            "insufficient kernel memory is available",
        (Open, EINVAL) =>
            "invalid flags were passed when creating the instance",
        (AddWatch, EACCES) =>
            "read access to the watched path is not permitted",
        (AddWatch, EINVAL) =>
            "the event mask contains no valid events, or the descriptor is \
            not an inotify instance",
        (AddWatch, ENOSPC) =>
            "the user limit on the total number of inotify watches was \
            reached, or the kernel failed to allocate a needed resource",
        (RemoveWatch, EINVAL) =>
            "the watch descriptor is not valid for this channel, or the \
            descriptor is not an inotify instance",
        (RemoveWatch, EBADF) =>
            "the channel's file descriptor is not valid, so no watch can be \
            removed from it",
        (_, EBADF) =>
            "the channel's file descriptor is not valid",
        _ => return None,
    };

    Some(message)
}

/// Turns the raw error from a gateway call into an [`Error`]
///
/// The category follows from the errno, except that `EBADF` from
/// [`Operation::RemoveWatch`] counts as an invalid argument. The message is
/// specific to `operation` where one is known and falls back to the OS
/// description otherwise. Errors without an errno are reported as [`Error::Os`].
pub fn classify(operation: Operation, source: io::Error) -> Error {
    let code = match source.raw_os_error() {
        Some(code) => code,
        None       => return Error::Os { operation, source },
    };

    let message = match diagnostic(operation, code) {
        Some(message) => Cow::Borrowed(message),
        None          => Cow::Owned(source.to_string()),
    };

    match (operation, code) {
        (_, EMFILE) | (_, ENFILE) | (_, ENOSPC) =>
            Error::ResourceLimit { operation, message, source },
        (_, ENOMEM) =>
            Error::KernelMemory { operation, message, source },
        (_, EACCES) | (_, EPERM) =>
            Error::Permission { operation, message, source },
        // Removing a watch only ever reports a bad argument.
        (Operation::RemoveWatch, EBADF) | (_, EINVAL) =>
            Error::InvalidArgument {
                operation,
                message,
                source: Some(source),
            },
        (_, EBADF) =>
            Error::InvalidDescriptor {
                operation,
                message,
                source: Some(source),
            },
        _ =>
            Error::Os { operation, source },
    }
}
