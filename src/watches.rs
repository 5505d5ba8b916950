use std::{
    cmp::Ordering,
    ffi::CString,
    hash::{
        Hash,
        Hasher,
    },
    os::raw::c_int,
    os::unix::ffi::OsStrExt,
    path::Path,
    sync::{
        Arc,
        Weak,
    },
};

use inotify_sys as ffi;
use tracing::debug;

use crate::error::{
    self,
    Error,
    Operation,
};
use crate::fd_guard::FdGuard;

bitflags! {
    /// Describes a file system watch
    ///
    /// Passed to [`Watches::add`], to describe what file system events
    /// to watch for, and how to do that.
    ///
    /// # Examples
    ///
    /// `WatchMask` constants can be passed to [`Watches::add`] as is, or
    /// combined. Here we add a watch that is triggered both when files are
    /// created or deleted in a directory:
    ///
    /// ``` rust
    /// # use inotify_channel::{
    /// #     Channel,
    /// #     WatchMask,
    /// # };
    /// #
    /// # let channel = Channel::open().unwrap();
    /// channel.watches().add("/tmp/", WatchMask::CREATE | WatchMask::DELETE)
    ///    .expect("Error adding watch");
    /// ```
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct WatchMask: u32 {
        /// File was accessed
        ///
        /// When watching a directory, this event is only triggered for objects
        /// inside the directory, not the directory itself.
        const ACCESS = ffi::IN_ACCESS;

        /// Metadata (permissions, timestamps, ...) changed
        ///
        /// When watching a directory, this event can be triggered for the
        /// directory itself, as well as objects inside the directory.
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

        /// Watch for all events
        ///
        /// Combination of every event kind above. Modifier flags are not
        /// included.
        const ALL_EVENTS = ffi::IN_ALL_EVENTS;

        /// Watch for both [`MOVED_FROM`](Self::MOVED_FROM) and
        /// [`MOVED_TO`](Self::MOVED_TO)
        const MOVE = ffi::IN_MOVE;

        /// Watch for both [`CLOSE_WRITE`](Self::CLOSE_WRITE) and
        /// [`CLOSE_NOWRITE`](Self::CLOSE_NOWRITE)
        const CLOSE = ffi::IN_CLOSE;

        /// Don't dereference the path if it is a symbolic link
        const DONT_FOLLOW = ffi::IN_DONT_FOLLOW;

        /// Filter events for directory entries that have been unlinked
        const EXCL_UNLINK = ffi::IN_EXCL_UNLINK;

        /// If a watch for the inode exists, amend it instead of replacing it
        const MASK_ADD = ffi::IN_MASK_ADD;

        /// Only receive one event, then remove the watch
        const ONESHOT = ffi::IN_ONESHOT;

        /// Only watch path, if it is a directory
        const ONLYDIR = ffi::IN_ONLYDIR;
    }
}


/// Interface for adding and removing watches
///
/// Obtained from [`Channel::watches`]. Handles stay usable for as long as the
/// channel is open. Once it has been closed, [`Watches::add`] fails with
/// [`Error::InvalidDescriptor`] and [`Watches::remove`] with
/// [`Error::InvalidArgument`].
///
/// [`Channel::watches`]: crate::Channel::watches
#[derive(Clone, Debug)]
pub struct Watches {
    pub(crate) fd: Arc<FdGuard>,
}

impl Watches {
    pub(crate) fn new(fd: Arc<FdGuard>) -> Self {
        Watches {
            fd,
        }
    }

    /// Adds or updates a watch for the given path
    ///
    /// Adds a new watch or updates an existing one for the file referred to by
    /// `path`. Returns a watch descriptor that can be used to refer to this
    /// watch later.
    ///
    /// If the inode behind `path` is already watched by this channel, the
    /// same [`WatchDescriptor`] is returned, and the watch's mask is replaced
    /// by `mask`, unless `mask` contains [`WatchMask::MASK_ADD`], in which
    /// case the two masks are merged. Note that a different path linking to
    /// the same inode counts as the same watch.
    ///
    /// # Errors
    ///
    /// - [`Error::Permission`], if the path can't be read.
    /// - [`Error::InvalidArgument`], if `mask` contains no event, or the
    ///   descriptor is not an inotify instance. The kernel reports both the
    ///   same way. Also returned if `path` contains a NUL byte.
    /// - [`Error::InvalidDescriptor`], if the channel has been closed.
    /// - [`Error::ResourceLimit`], if the per-user watch limit was reached.
    /// - [`Error::KernelMemory`], if the kernel ran out of memory.
    /// - [`Error::Os`] for anything else, for example a missing path.
    pub fn add<P>(&mut self, path: P, mask: WatchMask)
        -> Result<WatchDescriptor, Error>
        where P: AsRef<Path>
    {
        let path = path.as_ref();
        let fd = self.fd.fd(Operation::AddWatch)?;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::rejected(
                Operation::AddWatch,
                "the path contains a NUL byte",
            ))?;

        let wd = self.fd.gateway()
            .add_watch(fd, &c_path, mask.bits())
            .map_err(|source| error::classify(Operation::AddWatch, source))?;

        debug!(fd, wd, ?path, ?mask, "added watch");
        Ok(WatchDescriptor{ id: wd, fd: Arc::downgrade(&self.fd) })
    }

    /// Stops watching a file
    ///
    /// Removes the watch represented by the provided [`WatchDescriptor`].
    /// [`WatchDescriptor`]s can be obtained via [`Watches::add`], or from the
    /// `wd` field of [`Event`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the watch is unknown to the
    /// kernel, which is expected if the kernel already removed it (see
    /// [`EventMask::IGNORED`]). The same error is returned, without asking
    /// the kernel, if the descriptor originates from another channel or the
    /// channel has already been closed. Use [`Error::is_invalid_argument`]
    /// to tell this case apart.
    ///
    /// [`Event`]: crate::Event
    /// [`EventMask::IGNORED`]: crate::EventMask::IGNORED
    pub fn remove(&mut self, wd: WatchDescriptor) -> Result<(), Error> {
        // Closing the channel drops every watch, so a descriptor can't be
        // valid anymore.
        let fd = self.fd.fd(Operation::RemoveWatch)
            .map_err(|_| Error::rejected(
                Operation::RemoveWatch,
                "the channel has already been closed",
            ))?;

        let same_channel = wd.fd.upgrade()
            .map_or(false, |origin| Arc::ptr_eq(&origin, &self.fd));
        if !same_channel {
            return Err(Error::rejected(
                Operation::RemoveWatch,
                "the watch descriptor belongs to a different channel",
            ));
        }

        match self.fd.gateway().remove_watch(fd, wd.id) {
            Ok(()) => {
                debug!(fd, wd = wd.id, "removed watch");
                Ok(())
            }
            Err(source) => {
                let error = error::classify(Operation::RemoveWatch, source);
                if error.is_invalid_argument() {
                    debug!(fd, wd = wd.id, "watch was already gone");
                }
                Err(error)
            }
        }
    }
}


/// Represents a watch on an inode
///
/// Can be obtained from [`Watches::add`] or from an [`Event`]. A watch
/// descriptor can be used to get inotify to stop watching an inode by passing
/// it to [`Watches::remove`].
///
/// Two descriptors are equal only if they have the same id and come from
/// the same, still open, channel.
///
/// [`Event`]: crate::Event
#[derive(Clone, Debug)]
pub struct WatchDescriptor{
    pub(crate) id: c_int,
    pub(crate) fd: Weak<FdGuard>,
}

impl WatchDescriptor {
    /// Returns the kernel's id for this watch
    ///
    /// Ids are only unique within one channel.
    pub fn id(&self) -> c_int {
        self.id
    }
}

impl Eq for WatchDescriptor {}

impl PartialEq for WatchDescriptor {
    fn eq(&self, other: &Self) -> bool {
        let self_fd  = self.fd.upgrade();
        let other_fd = other.fd.upgrade();

        let same_channel = match (self_fd, other_fd) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b) && a.is_open(),
            _                  => false,
        };

        self.id == other.id && same_channel
    }
}

impl Ord for WatchDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for WatchDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for WatchDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Only the id is hashed. The channel is a weak pointer that may be
        // gone by now, and the hash must not change when that happens.
        self.id.hash(state);
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::error::ErrorKind;
    use crate::gateway::fake::FakeGateway;
    use crate::{
        Channel,
        ChannelOptions,
        WatchMask,
    };

    fn open(gateway: &Arc<FakeGateway>) -> Channel {
        Channel::open_with(gateway.clone(), ChannelOptions::default())
            .expect("Failed to open channel")
    }

    #[test]
    fn add_then_remove_should_succeed() {
        let gateway = Arc::new(FakeGateway::new());
        let channel = open(&gateway);
        let mut watches = channel.watches();

        let wd = watches.add("/watched", WatchMask::MODIFY)
            .expect("Failed to add watch");
        watches.remove(wd).expect("Failed to remove watch");

        assert_eq!(gateway.watch_mask("/watched"), None);
    }

    #[test]
    fn adding_the_same_path_should_replace_or_merge_the_mask() {
        let gateway = Arc::new(FakeGateway::new());
        let channel = open(&gateway);
        let mut watches = channel.watches();

        let first = watches.add("/watched", WatchMask::MODIFY).unwrap();
        let second = watches.add("/watched", WatchMask::CREATE).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            gateway.watch_mask("/watched"),
            Some(WatchMask::CREATE.bits()),
        );

        watches.add("/watched", WatchMask::DELETE | WatchMask::MASK_ADD)
            .unwrap();
        assert_eq!(
            gateway.watch_mask("/watched"),
            Some((WatchMask::CREATE | WatchMask::DELETE).bits()),
        );
    }

    #[test]
    fn removing_twice_should_be_an_invalid_argument() {
        let gateway = Arc::new(FakeGateway::new());
        let channel = open(&gateway);
        let mut watches = channel.watches();

        let wd = watches.add("/watched", WatchMask::MODIFY).unwrap();
        watches.remove(wd.clone()).unwrap();

        let error = watches.remove(wd).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn removing_a_descriptor_from_another_channel_should_fail() {
        let gateway = Arc::new(FakeGateway::new());
        let a = open(&gateway);
        let b = open(&gateway);

        let wd = a.watches().add("/watched", WatchMask::MODIFY).unwrap();

        let error = b.watches().remove(wd.clone()).unwrap_err();
        assert!(error.is_invalid_argument());
        assert_eq!(error.raw_os_error(), None);

        // The watch is still there on the channel it belongs to.
        a.watches().remove(wd).expect("Failed to remove watch");
    }

    #[test]
    fn empty_mask_should_be_an_invalid_argument() {
        let gateway = Arc::new(FakeGateway::new());
        let channel = open(&gateway);

        let error = channel.watches()
            .add("/watched", WatchMask::empty())
            .unwrap_err();
        assert!(error.is_invalid_argument());
    }

    #[test]
    fn path_with_nul_byte_should_be_rejected() {
        let gateway = Arc::new(FakeGateway::new());
        let channel = open(&gateway);

        let error = channel.watches()
            .add("/bad\0path", WatchMask::MODIFY)
            .unwrap_err();
        assert!(error.is_invalid_argument());
    }

    #[test]
    fn add_errors_should_be_classified() {
        let gateway = Arc::new(FakeGateway::new());
        let channel = open(&gateway);

        gateway.fail_add_with(libc::EACCES);
        let error = channel.watches()
            .add("/secret", WatchMask::MODIFY)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Permission);

        gateway.fail_add_with(libc::ENOSPC);
        let error = channel.watches()
            .add("/secret", WatchMask::MODIFY)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ResourceLimit);
    }

    #[test]
    fn watches_should_fail_after_the_channel_is_closed() {
        let gateway = Arc::new(FakeGateway::new());
        let channel = open(&gateway);
        let mut watches = channel.watches();

        channel.close().expect("Failed to close channel");

        let error = watches.add("/watched", WatchMask::MODIFY).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidDescriptor);
    }

    #[test]
    fn removing_after_the_channel_is_closed_should_be_an_invalid_argument() {
        let gateway = Arc::new(FakeGateway::new());
        let channel = open(&gateway);
        let mut watches = channel.watches();

        let wd = watches.add("/watched", WatchMask::MODIFY).unwrap();
        channel.close().expect("Failed to close channel");

        let error = watches.remove(wd).unwrap_err();
        assert!(error.is_invalid_argument());
        assert_eq!(error.raw_os_error(), None);
        assert!(error.to_string().contains("already been closed"));
    }
}
