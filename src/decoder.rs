use std::{
    cmp,
    io,
    sync::Arc,
};

use tracing::{
    trace,
    warn,
};

use crate::error::{
    self,
    Error,
    Operation,
};
use crate::events::{
    decode_records,
    Event,
    EVENT_HEADER_SIZE,
};
use crate::fd_guard::FdGuard;
use crate::gateway::ControlRequest;


/// Smallest buffer ever passed to `read`
///
/// Large enough for one event with a short name.
pub(crate) const MIN_BUFFER_SIZE: usize = EVENT_HEADER_SIZE + 32;

/// Scales `size` by 1.6, rounding up
fn scale(size: usize) -> usize {
    size.saturating_mul(8).saturating_add(4) / 5
}

/// Buffer size for a read, given the number of bytes the kernel reports as
/// pending
pub(crate) fn initial_buffer_size(pending: usize) -> usize {
    cmp::max(scale(pending), MIN_BUFFER_SIZE)
}

/// Buffer size to retry with after the kernel rejected `size` as too small
///
/// Always strictly larger than `size`.
pub(crate) fn grow_buffer_size(size: usize) -> usize {
    cmp::max(scale(size), size.saturating_add(1))
}


/// Asks the kernel how many bytes of events are queued
pub(crate) fn pending_bytes(fd: &FdGuard) -> Result<usize, Error> {
    let raw = fd.fd(Operation::PendingBytes)?;
    let pending = fd.gateway()
        .control(raw, ControlRequest::PendingBytes)
        .map_err(|source| error::classify(Operation::PendingBytes, source))?;

    Ok(cmp::max(pending, 0) as usize)
}


/// Reads and decodes the events queued on a channel
///
/// Keeps its buffer between reads, so a channel that regularly receives
/// bursts of events doesn't allocate for every read.
#[derive(Debug, Default)]
pub(crate) struct EventReader {
    buffer: Vec<u8>,
}

impl EventReader {
    pub(crate) fn new() -> Self {
        EventReader::default()
    }

    /// Performs one read
    ///
    /// Returns an empty list if the channel is non-blocking and nothing is
    /// queued.
    pub(crate) fn read(&mut self, fd: &Arc<FdGuard>)
        -> Result<Vec<Event>, Error>
    {
        let raw = fd.fd(Operation::Read)?;

        // The pending count is only a hint. A failed query or a zero answer
        // must not keep us from reading.
        let pending = pending_bytes(fd).unwrap_or_else(|error| {
            warn!(fd = raw, %error, "failed to query pending bytes");
            0
        });
        let mut size = initial_buffer_size(pending);
        trace!(fd = raw, pending, size, "reading events");

        loop {
            if self.buffer.len() < size {
                self.buffer.resize(size, 0);
            }

            let result = fd.gateway().read_bytes(raw, &mut self.buffer[..size]);
            match result {
                Ok(len) => {
                    let len = cmp::min(len, size);
                    trace!(fd = raw, len, "read events");

                    let events =
                        decode_records(&Arc::downgrade(fd), &self.buffer[..len])?;
                    return Ok(events);
                }
                Err(source) if source.raw_os_error() == Some(libc::EINVAL) => {
                    // The next event doesn't fit into the buffer.
                    let next = grow_buffer_size(size);
                    trace!(fd = raw, size, next, "buffer too small, growing");
                    size = next;
                }
                Err(source) if source.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Vec::new());
                }
                Err(source) if source.kind() == io::ErrorKind::Interrupted => {
                    trace!(fd = raw, "read interrupted, retrying");
                }
                Err(source) => {
                    return Err(error::classify(Operation::Read, source));
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::{
        grow_buffer_size,
        initial_buffer_size,
        MIN_BUFFER_SIZE,
    };

    #[test]
    fn initial_size_should_be_pending_times_1_6_rounded_up() {
        assert_eq!(initial_buffer_size(128), 205);
        assert_eq!(initial_buffer_size(1000), 1600);
    }

    #[test]
    fn initial_size_should_fit_at_least_one_minimal_event() {
        assert_eq!(MIN_BUFFER_SIZE, 48);
        assert_eq!(initial_buffer_size(0), MIN_BUFFER_SIZE);
        assert_eq!(initial_buffer_size(16), MIN_BUFFER_SIZE);
    }

    #[test]
    fn growth_should_be_strictly_increasing() {
        assert_eq!(grow_buffer_size(48), 77);
        assert_eq!(grow_buffer_size(77), 124);
        assert_eq!(grow_buffer_size(1), 2);
        assert_eq!(grow_buffer_size(0), 1);

        let mut size = MIN_BUFFER_SIZE;
        for _ in 0..32 {
            let next = grow_buffer_size(size);
            assert!(next > size);
            size = next;
        }
    }
}
