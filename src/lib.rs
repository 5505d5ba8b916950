#![warn(missing_docs)]

//! Minimal client for a Linux inotify channel
//!
//! [Inotify][wiki] is a linux kernel mechanism for monitoring
//! changes to filesystems' contents.
//!
//! > The inotify API provides a mechanism for monitoring filesystem
//! > events. Inotify can be used to monitor individual files, or to
//! > monitor directories. When a directory is monitored, inotify will
//! > return events for the directory itself, and for files inside the
//! > directory.
//!
//! This crate covers exactly one inotify instance at a time: a [`Channel`]
//! owns the descriptor, [`Watches`] adds and removes watches, and
//! [`Channel::read_events`] reads and decodes whatever the kernel has queued,
//! growing its buffer until the next event fits. It does not track
//! directories recursively and does not coalesce events.
//!
//! All system calls go through a [`SyscallGateway`]. [`Channel::open`] uses
//! the real kernel; [`Channel::open_with`] takes any other implementation.
//!
//! Errors are classified into a closed set of [`ErrorKind`]s, with messages
//! specific to the failing call. A non-blocking read with nothing queued is
//! not an error; it returns an empty list.
//!
//! See the [man page][inotify7] for usage information of the C API.
//!
//! [wiki]: https://en.wikipedia.org/wiki/Inotify
//! [inotify7]: http://man7.org/linux/man-pages/man7/inotify.7.html


#[macro_use]
extern crate bitflags;

mod channel;
mod decoder;
mod events;
mod fd_guard;
mod watches;

pub mod error;
pub mod gateway;

pub use crate::channel::{
    Channel,
    ChannelOptions,
};
pub use crate::error::{
    Error,
    ErrorKind,
    Operation,
};
pub use crate::events::{
    decode,
    DecodeError,
    Event,
    EventMask,
    EVENT_HEADER_SIZE,
};
pub use crate::gateway::{
    ControlRequest,
    SyscallGateway,
    SystemGateway,
};
pub use crate::watches::{
    WatchDescriptor,
    WatchMask,
    Watches,
};
