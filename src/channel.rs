use std::{
    os::raw::c_int,
    os::unix::io::{
        AsFd,
        AsRawFd,
        BorrowedFd,
        RawFd,
    },
    sync::Arc,
};

use inotify_sys as ffi;
use tracing::debug;

use crate::decoder::{
    self,
    EventReader,
};
use crate::error::{
    self,
    Error,
    Operation,
};
use crate::events::Event;
use crate::fd_guard::FdGuard;
use crate::gateway::{
    ControlRequest,
    SyscallGateway,
    SystemGateway,
};
use crate::watches::Watches;


/// Settings for a new [`Channel`]
///
/// # Examples
///
/// ```
/// use inotify_channel::ChannelOptions;
///
/// let options = ChannelOptions::new().blocking(false);
/// assert!(!options.is_blocking());
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelOptions {
    blocking: bool,
    close_on_exec: bool,
}

impl ChannelOptions {
    /// Blocking reads, descriptor closed on `exec`
    pub fn new() -> Self {
        ChannelOptions {
            blocking: true,
            close_on_exec: true,
        }
    }

    /// Whether [`Channel::read_events`] waits for events
    ///
    /// A non-blocking channel is created non-blocking right away
    /// (`IN_NONBLOCK`), not switched over after the fact.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Whether the descriptor is closed in child processes after `exec`
    /// (`IN_CLOEXEC`)
    pub fn close_on_exec(mut self, close_on_exec: bool) -> Self {
        self.close_on_exec = close_on_exec;
        self
    }

    /// Returns whether these options describe a blocking channel
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn flags(&self) -> c_int {
        let mut flags = 0;
        if self.close_on_exec {
            flags |= ffi::IN_CLOEXEC;
        }
        if !self.blocking {
            flags |= ffi::IN_NONBLOCK;
        }
        flags
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions::new()
    }
}


/// An open inotify instance
///
/// `Channel` owns the inotify file descriptor. Watches are managed through
/// [`Channel::watches`], events are retrieved with [`Channel::read_events`].
/// The descriptor is released by [`Channel::close`], or when the channel is
/// dropped, whichever comes first.
///
/// To wait for events together with other I/O, register the descriptor
/// (see [`AsRawFd`] and [`AsFd`]) with `poll`, `select` or `epoll`, switch
/// the channel to non-blocking mode, and call [`Channel::read_events`] once
/// it becomes readable. With the `mio` feature, `Channel` can be registered
/// with a `mio::Poll` directly.
///
/// # Examples
///
/// ```
/// use inotify_channel::{
///     Channel,
///     WatchMask,
/// };
///
/// let mut channel = Channel::open()
///     .expect("Failed to open inotify channel");
///
/// // Ignore the error. The file we're trying to watch doesn't exist.
/// let _ = channel.watches().add(
///     "path/to/file",
///     WatchMask::MODIFY | WatchMask::CLOSE,
/// );
///
/// channel.set_blocking(false)
///     .expect("Failed to switch to non-blocking mode");
/// for event in channel.read_events().expect("Failed to read events") {
///     // Handle event
/// }
/// ```
#[derive(Debug)]
pub struct Channel {
    fd: Arc<FdGuard>,
    blocking: bool,
    reader: EventReader,
}

impl Channel {
    /// Opens a channel with the default [`ChannelOptions`]
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceLimit`], if the per-user limit on inotify instances
    ///   or the system-wide limit on open files was reached.
    /// - [`Error::KernelMemory`], if the kernel ran out of memory.
    /// - [`Error::Os`] for anything else.
    ///
    /// Nothing needs to be cleaned up after an error.
    pub fn open() -> Result<Self, Error> {
        Channel::open_with(Arc::new(SystemGateway::new()), ChannelOptions::new())
    }

    /// Opens a channel through the given gateway
    ///
    /// See [`Channel::open`] for the possible errors.
    pub fn open_with(
        gateway: Arc<dyn SyscallGateway>,
        options: ChannelOptions,
    )
        -> Result<Self, Error>
    {
        let fd = gateway
            .create_channel(options.flags())
            .map_err(|source| error::classify(Operation::Open, source))?;

        debug!(fd, blocking = options.blocking, "opened inotify channel");
        Ok(Channel {
            fd: Arc::new(FdGuard::new(fd, gateway)),
            blocking: options.blocking,
            reader: EventReader::new(),
        })
    }

    /// Gets an interface that allows adding and removing watches
    pub fn watches(&self) -> Watches {
        Watches::new(self.fd.clone())
    }

    /// Switches between blocking and non-blocking reads
    ///
    /// Calling this with the current mode is allowed and changes nothing.
    pub fn set_blocking(&mut self, blocking: bool) -> Result<(), Error> {
        let fd = self.fd.fd(Operation::SetBlocking)?;
        self.fd.gateway()
            .control(fd, ControlRequest::SetNonBlocking(!blocking))
            .map_err(|source| error::classify(Operation::SetBlocking, source))?;

        debug!(fd, blocking, "changed blocking mode");
        self.blocking = blocking;
        Ok(())
    }

    /// Returns whether [`Channel::read_events`] waits for events
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Returns the number of bytes of events the kernel has queued
    ///
    /// This is a hint only. Some kernels report `0` although an event is
    /// ready, so a `0` here doesn't mean a read would come back empty.
    pub fn pending_count(&self) -> Result<usize, Error> {
        decoder::pending_bytes(&self.fd)
    }

    /// Reads the events the kernel has queued
    ///
    /// If the channel is blocking, this waits until at least one event is
    /// available. If it is non-blocking and no event is queued, an empty list
    /// is returned right away.
    ///
    /// The read buffer is sized after the pending byte count and grown until
    /// the next event fits, so no event is ever too large to be read. Events
    /// are returned in the order the kernel queued them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the kernel returned a malformed buffer,
    /// and a classified OS error if the read itself failed. In both cases
    /// the channel remains open and usable.
    pub fn read_events(&mut self) -> Result<Vec<Event>, Error> {
        self.reader.read(&self.fd)
    }

    /// Closes the channel
    ///
    /// Dropping the channel closes it too, but swallows any error.
    /// [`Watches`] handles obtained from this channel fail afterwards (see
    /// [`Watches`] for the error each call returns).
    pub fn close(self) -> Result<(), Error> {
        self.fd.close()
    }
}

impl AsRawFd for Channel {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd.raw()
    }
}

impl AsFd for Channel {
    #[inline]
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: Only `Channel::close`, which consumes the channel, and
        // `FdGuard`'s `Drop` close the descriptor. It is open for as long as
        // `self` is borrowed.
        unsafe { BorrowedFd::borrow_raw(self.fd.raw()) }
    }
}

#[cfg(feature = "mio")]
impl mio::event::Source for Channel {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    )
        -> std::io::Result<()>
    {
        mio::unix::SourceFd(&self.fd.raw()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    )
        -> std::io::Result<()>
    {
        mio::unix::SourceFd(&self.fd.raw())
            .reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> std::io::Result<()> {
        mio::unix::SourceFd(&self.fd.raw()).deregister(registry)
    }
}


#[cfg(test)]
mod tests {
    use std::{
        ffi::OsStr,
        sync::Arc,
    };

    use crate::error::{
        Error,
        ErrorKind,
    };
    use crate::events::{
        DecodeError,
        EventMask,
    };
    use crate::gateway::fake::FakeGateway;
    use crate::watches::WatchMask;

    use super::{
        Channel,
        ChannelOptions,
    };

    fn open(gateway: &Arc<FakeGateway>, options: ChannelOptions) -> Channel {
        Channel::open_with(gateway.clone(), options)
            .expect("Failed to open channel")
    }

    #[test]
    fn open_failure_should_be_classified_and_allocate_nothing() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_create_with(libc::EMFILE);

        let error = Channel::open_with(gateway.clone(), ChannelOptions::new())
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::ResourceLimit);
        assert!(gateway.closed().is_empty());
    }

    #[test]
    fn open_should_translate_options_into_flags() {
        let gateway = Arc::new(FakeGateway::new());

        let channel = open(&gateway, ChannelOptions::new());
        assert!(channel.is_blocking());
        assert!(!gateway.is_nonblocking());

        let channel = open(&gateway, ChannelOptions::new().blocking(false));
        assert!(!channel.is_blocking());
        assert!(gateway.is_nonblocking());
    }

    #[test]
    fn close_should_release_the_descriptor_exactly_once() {
        let gateway = Arc::new(FakeGateway::new());
        let channel = open(&gateway, ChannelOptions::new());
        let fd = channel.fd.raw();
        let watches = channel.watches();

        channel.close().expect("Failed to close channel");
        drop(watches);

        assert_eq!(gateway.closed(), vec![fd]);
    }

    #[test]
    fn drop_should_release_the_descriptor() {
        let gateway = Arc::new(FakeGateway::new());
        let channel = open(&gateway, ChannelOptions::new());
        let fd = channel.fd.raw();

        drop(channel);

        assert_eq!(gateway.closed(), vec![fd]);
    }

    #[test]
    fn toggling_blocking_mode_should_always_succeed() {
        let gateway = Arc::new(FakeGateway::new());
        let mut channel = open(&gateway, ChannelOptions::new());

        for &blocking in &[true, false, false, true, true] {
            channel.set_blocking(blocking)
                .expect("Failed to set blocking mode");
            assert_eq!(channel.is_blocking(), blocking);
            assert_eq!(gateway.is_nonblocking(), !blocking);
        }
    }

    #[test]
    fn would_block_should_produce_no_events() {
        let gateway = Arc::new(FakeGateway::new());
        let mut channel = open(&gateway, ChannelOptions::new().blocking(false));

        let events = channel.read_events().expect("Failed to read events");

        assert!(events.is_empty());
    }

    #[test]
    fn events_should_be_read_in_queue_order() {
        let gateway = Arc::new(FakeGateway::new());
        let mut channel = open(&gateway, ChannelOptions::new());
        let wd = channel.watches().add("/dir", WatchMask::ALL_EVENTS).unwrap();

        gateway.push_event(wd.id(), EventMask::MOVED_FROM.bits(), 7,
            Some("old"));
        gateway.push_event(wd.id(), EventMask::MOVED_TO.bits(), 7,
            Some("new"));
        gateway.push_event(wd.id(), EventMask::MOVE_SELF.bits(), 0, None);

        let events = channel.read_events().expect("Failed to read events");

        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|event| event.wd == wd));
        assert_eq!(events[0].mask, EventMask::MOVED_FROM);
        assert_eq!(events[0].name.as_deref(), Some(OsStr::new("old")));
        assert_eq!(events[1].mask, EventMask::MOVED_TO);
        assert_eq!(events[1].name.as_deref(), Some(OsStr::new("new")));
        assert_eq!(events[0].cookie, events[1].cookie);
        assert_eq!(events[2].mask, EventMask::MOVE_SELF);
        assert_eq!(events[2].name, None);
    }

    #[test]
    fn buffer_should_grow_until_the_event_fits() {
        let gateway = Arc::new(FakeGateway::new());
        let mut channel = open(&gateway, ChannelOptions::new());

        // A 100 byte name pads out to a 128 byte record.
        let name = "x".repeat(100);
        gateway.push_event(1, EventMask::CREATE.bits(), 0, Some(name.as_str()));
        gateway.set_pending_hint(0);

        let events = channel.read_events().expect("Failed to read events");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name.as_deref(), Some(OsStr::new(&name)));

        let sizes = gateway.read_sizes();
        assert_eq!(sizes, vec![48, 77, 124, 199]);
        assert!(sizes.windows(2).all(|pair| pair[1] > pair[0]));
    }

    #[test]
    fn accurate_pending_count_should_need_a_single_read() {
        let gateway = Arc::new(FakeGateway::new());
        let mut channel = open(&gateway, ChannelOptions::new());

        let name = "y".repeat(100);
        gateway.push_event(1, EventMask::CREATE.bits(), 0, Some(name.as_str()));
        assert_eq!(channel.pending_count().unwrap(), 128);

        channel.read_events().expect("Failed to read events");

        assert_eq!(gateway.read_sizes(), vec![205]);
    }

    #[test]
    fn interrupted_reads_should_be_retried() {
        let gateway = Arc::new(FakeGateway::new());
        let mut channel = open(&gateway, ChannelOptions::new());

        gateway.push_event(1, EventMask::MODIFY.bits(), 0, None);
        gateway.interrupt_reads(2);

        let events = channel.read_events().expect("Failed to read events");

        assert_eq!(events.len(), 1);
        assert_eq!(gateway.read_sizes().len(), 3);
    }

    #[test]
    fn decode_error_should_leave_the_channel_usable() {
        let gateway = Arc::new(FakeGateway::new());
        let mut channel = open(&gateway, ChannelOptions::new());

        // Too short to hold even a header.
        gateway.push_raw(vec![1, 2, 3, 4, 5]);

        match channel.read_events() {
            Err(Error::Decode(error)) => assert_eq!(
                error,
                DecodeError::TruncatedHeader { offset: 0, available: 5 },
            ),
            result => panic!("Unexpected result: {:?}", result),
        }

        let events = channel.read_events().expect("Failed to read events");
        assert!(events.is_empty());

        gateway.push_event(1, EventMask::MODIFY.bits(), 0, None);
        let events = channel.read_events().expect("Failed to read events");
        assert_eq!(events.len(), 1);
        assert!(gateway.closed().is_empty());
    }
}
