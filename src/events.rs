use std::{
    ffi::{
        OsStr,
        OsString,
    },
    mem,
    os::unix::ffi::OsStrExt,
    sync::Weak,
};

use inotify_sys as ffi;
use thiserror::Error;

use crate::fd_guard::FdGuard;
use crate::watches::WatchDescriptor;


/// Size of the fixed part of every record in the event stream
///
/// Each record starts with `wd`, `mask`, `cookie` and `len`, four bytes each,
/// in native byte order. `len` bytes of NUL-padded name follow.
pub const EVENT_HEADER_SIZE: usize = mem::size_of::<ffi::inotify_event>();


/// An inotify event
///
/// A file system event that describes a change that the user previously
/// registered interest in. To watch for events, call [`Watches::add`]. To
/// retrieve events, call [`Channel::read_events`].
///
/// [`Watches::add`]: crate::Watches::add
/// [`Channel::read_events`]: crate::Channel::read_events
#[derive(Clone, Debug)]
pub struct Event {
    /// Identifies the watch this event originates from
    ///
    /// This [`WatchDescriptor`] is equal to the one that [`Watches::add`]
    /// returned when interest for this event was registered, as long as the
    /// channel is still alive.
    ///
    /// [`Watches::add`]: crate::Watches::add
    pub wd: WatchDescriptor,

    /// Indicates what kind of event this is
    pub mask: EventMask,

    /// Connects related events to each other
    ///
    /// When a file is renamed, this results two events: [`MOVED_FROM`] and
    /// [`MOVED_TO`]. The `cookie` field will be the same for both of them,
    /// thereby making is possible to connect the event pair. It is `0` for
    /// all other events.
    ///
    /// [`MOVED_FROM`]: EventMask::MOVED_FROM
    /// [`MOVED_TO`]: EventMask::MOVED_TO
    pub cookie: u32,

    /// The name of the file the event originates from
    ///
    /// This field is set only if the subject of the event is a file or
    /// directory in a watched directory. If the event concerns a file or
    /// directory that is watched directly, `name` will be `None`.
    pub name: Option<OsString>,
}

impl Event {
    /// Decodes the record at the beginning of `buffer`
    ///
    /// `offset` is the position of `buffer` within the whole read and is only
    /// used for error reporting. Returns the number of bytes the record
    /// occupies, and the event.
    fn from_buffer(fd: Weak<FdGuard>, buffer: &[u8], offset: usize)
        -> Result<(usize, Self), DecodeError>
    {
        if buffer.len() < EVENT_HEADER_SIZE {
            return Err(DecodeError::TruncatedHeader {
                offset,
                available: buffer.len(),
            });
        }

        let wd     = i32::from_ne_bytes(field(buffer, 0));
        let mask   = u32::from_ne_bytes(field(buffer, 1));
        let cookie = u32::from_ne_bytes(field(buffer, 2));
        let len    = u32::from_ne_bytes(field(buffer, 3)) as usize;

        let available = buffer.len() - EVENT_HEADER_SIZE;
        if available < len {
            return Err(DecodeError::TruncatedName {
                offset,
                len,
                available,
            });
        }

        // A record without a name has no name field at all. Whatever follows
        // the header belongs to the next record.
        let name = if len > 0 {
            let name = &buffer[EVENT_HEADER_SIZE..EVENT_HEADER_SIZE + len];

            // Strip the NUL terminator and the alignment padding after it.
            let end = name.iter().position(|&b| b == 0).unwrap_or(len);
            Some(OsStr::from_bytes(&name[..end]).to_os_string())
        }
        else {
            None
        };

        let event = Event {
            wd: WatchDescriptor { id: wd, fd },
            mask: EventMask::from_bits_retain(mask),
            cookie,
            name,
        };

        Ok((EVENT_HEADER_SIZE + len, event))
    }
}

fn field(header: &[u8], index: usize) -> [u8; 4] {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&header[index * 4..index * 4 + 4]);
    bytes
}

/// Decodes every record in `buffer`, in order
///
/// `buffer` must hold exactly the bytes returned by one read.
pub(crate) fn decode_records(fd: &Weak<FdGuard>, buffer: &[u8])
    -> Result<Vec<Event>, DecodeError>
{
    let mut events = Vec::new();
    let mut offset = 0;

    while offset < buffer.len() {
        let (step, event) =
            Event::from_buffer(fd.clone(), &buffer[offset..], offset)?;
        events.push(event);
        offset += step;
    }

    Ok(events)
}

/// Decodes a buffer of raw inotify records
///
/// This is useful for callers that read from the descriptor themselves.
/// The returned events are not tied to a channel, so their
/// [`WatchDescriptor`]s never compare equal to anything. Compare
/// [`WatchDescriptor::id`] instead.
///
/// # Errors
///
/// Returns [`DecodeError`] if the buffer ends in the middle of a record.
pub fn decode(buffer: &[u8]) -> Result<Vec<Event>, DecodeError> {
    decode_records(&Weak::new(), buffer)
}


/// The event buffer ended in the middle of a record
///
/// The kernel only ever returns whole records, so this points to a bug in
/// the caller or this crate, or to a broken kernel.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum DecodeError {
    /// Not enough bytes left for a record header
    #[error("record at offset {offset} has a truncated header \
        ({available} bytes available)")]
    TruncatedHeader {
        /// Position of the record within the buffer
        offset: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// The name declared by the header runs past the end of the buffer
    #[error("record at offset {offset} declares a {len}-byte name, but only \
        {available} bytes follow the header")]
    TruncatedName {
        /// Position of the record within the buffer
        offset: usize,
        /// Declared name length
        len: usize,
        /// Bytes left in the buffer after the header
        available: usize,
    },
}


bitflags! {
    /// Indicates the type of an event
    ///
    /// This struct can be retrieved from an [`Event`] via its `mask` field.
    /// Bits this crate doesn't know about are kept as they are.
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct EventMask: u32 {
        /// File was accessed
        const ACCESS = ffi::IN_ACCESS;

        /// Metadata (permissions, timestamps, ...) changed
        const ATTRIB = ffi::IN_ATTRIB;

        /// File opened for writing was closed
        const CLOSE_WRITE = ffi::IN_CLOSE_WRITE;

        /// File or directory not opened for writing was closed
        const CLOSE_NOWRITE = ffi::IN_CLOSE_NOWRITE;

        /// File/directory created in watched directory
        const CREATE = ffi::IN_CREATE;

        /// File/directory deleted from watched directory
        const DELETE = ffi::IN_DELETE;

        /// Watched file/directory was deleted
        const DELETE_SELF = ffi::IN_DELETE_SELF;

        /// File was modified
        const MODIFY = ffi::IN_MODIFY;

        /// Watched file/directory was moved
        const MOVE_SELF = ffi::IN_MOVE_SELF;

        /// File was renamed/moved; watched directory contained old name
        const MOVED_FROM = ffi::IN_MOVED_FROM;

        /// File was renamed/moved; watched directory contains new name
        const MOVED_TO = ffi::IN_MOVED_TO;

        /// File or directory was opened
        const OPEN = ffi::IN_OPEN;

        /// Either of [`CLOSE_WRITE`](Self::CLOSE_WRITE) and
        /// [`CLOSE_NOWRITE`](Self::CLOSE_NOWRITE)
        const CLOSE = ffi::IN_CLOSE;

        /// Either of [`MOVED_FROM`](Self::MOVED_FROM) and
        /// [`MOVED_TO`](Self::MOVED_TO)
        const MOVE = ffi::IN_MOVE;

        /// Watch was removed
        ///
        /// Generated when the watch was removed explicitly (via
        /// [`Watches::remove`]), or by the kernel (because the file was
        /// deleted, the file system was unmounted, or a one-shot watch
        /// fired).
        ///
        /// [`Watches::remove`]: crate::Watches::remove
        const IGNORED = ffi::IN_IGNORED;

        /// The subject of the event is a directory
        const ISDIR = ffi::IN_ISDIR;

        /// Event queue overflowed and events have been lost
        ///
        /// The watch descriptor of such an event is `-1`.
        const Q_OVERFLOW = ffi::IN_Q_OVERFLOW;

        /// File system containing watched object was unmounted
        ///
        /// An event with [`EventMask::IGNORED`] follows for the same watch.
        const UNMOUNT = ffi::IN_UNMOUNT;
    }
}
