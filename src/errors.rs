use std::io;

use thiserror::Error;

/// The error type for all [`Watchdog`] operations
///
/// OS-level failures are carried verbatim as [`Error::Channel`]; the
/// underlying errno, where one exists, is available through
/// [`Error::raw_os_error`].
///
/// [`Watchdog`]: crate::Watchdog
#[derive(Debug, Error)]
pub enum Error {
    /// An OS-level failure on the notification channel
    ///
    /// Covers opening the inotify instance, adding and removing watches, and
    /// waiting on or reading from the event queue.
    #[error("notification channel error: {0}")]
    Channel(#[from] io::Error),

    /// The watchdog has been closed
    ///
    /// Returned by every operation attempted after [`Watchdog::close`].
    ///
    /// [`Watchdog::close`]: crate::Watchdog::close
    #[error("watchdog is closed")]
    Closed,

    /// The watch does not belong to this watchdog instance
    ///
    /// Returned by [`Watchdog::remove`] when passed a [`WatchId`] that was
    /// issued by a different instance, or whose instance has been closed.
    ///
    /// [`Watchdog::remove`]: crate::Watchdog::remove
    /// [`WatchId`]: crate::WatchId
    #[error("watch does not belong to this watchdog instance")]
    InvalidWatch,

    /// An event record overran the bytes read from the channel
    ///
    /// Should be unreachable with a correctly sized read buffer, since the
    /// kernel never splits a record across reads. If it occurs, the whole
    /// read is discarded and no handler is invoked for any part of it.
    #[error("malformed event buffer: record at offset {offset} overruns the {num_bytes} bytes read")]
    Framing {
        /// Offset of the truncated record within the read
        offset: usize,
        /// Total number of bytes the read returned
        num_bytes: usize,
    },
}

impl Error {
    /// Returns the OS error code underlying this error, if there is one
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Channel(err) => err.raw_os_error(),
            _ => None,
        }
    }
}
