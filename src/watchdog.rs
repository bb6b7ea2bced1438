use std::{
    ffi::{CString, OsStr},
    io, mem,
    os::unix::ffi::OsStrExt,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::Arc,
    time::Duration,
};

use inotify_sys as ffi;
use libc::c_int;
use tracing::{error, warn};

use crate::errors::Error;
use crate::events::{Event, EventMask, Events};
use crate::fd_guard::FdGuard;
use crate::registry::Registry;
use crate::util::read_into_buffer;
use crate::watches::{WatchId, WatchMask};

/// Size of the buffer each `poll` reads into
///
/// Room for 1024 events with maximal (255 byte) names, which is also the
/// minimum size at which the kernel is guaranteed never to truncate a single
/// record across reads.
const READ_BUFFER_SIZE: usize = 1024 * (mem::size_of::<ffi::inotify_event>() + 256);

/// A filesystem change notification dispatcher
///
/// Wraps one inotify instance together with a registry of per-watch
/// handlers. Watches are registered with [`add`] and unregistered with
/// [`remove`]; [`poll`] waits for the kernel to report events and invokes
/// the handler registered for each one, in delivery order.
///
/// All operations other than `poll` are non-blocking; `poll` blocks the
/// calling thread for at most its timeout. There is no internal threading or
/// locking. Handlers run synchronously inside `poll`, so a handler that
/// blocks stalls delivery of the events behind it.
///
/// Dropping a `Watchdog` releases the handlers and the inotify instance, the
/// same as [`close`], except that errors from the OS release are ignored.
///
/// [`add`]: Watchdog::add
/// [`remove`]: Watchdog::remove
/// [`poll`]: Watchdog::poll
/// [`close`]: Watchdog::close
#[derive(Debug)]
pub struct Watchdog {
    fd: Option<Arc<FdGuard>>,
    registry: Registry,
    buffer: Vec<u8>,
}

impl Watchdog {
    /// Creates a `Watchdog` with an empty registry
    ///
    /// Initializes an inotify instance by calling [`inotify_init1`] with
    /// `IN_CLOEXEC` (the descriptor must not leak to child processes) and
    /// `IN_NONBLOCK` (blocking behavior is managed entirely by [`poll`]).
    ///
    /// # Errors
    ///
    /// Directly returns the error from the call to [`inotify_init1`].
    ///
    /// [`inotify_init1`]: inotify_sys::inotify_init1
    /// [`poll`]: Watchdog::poll
    pub fn init() -> Result<Watchdog, Error> {
        let fd = unsafe { ffi::inotify_init1(ffi::IN_CLOEXEC | ffi::IN_NONBLOCK) };
        if fd == -1 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(Watchdog {
            fd: Some(Arc::new(FdGuard::new(fd))),
            registry: Registry::default(),
            buffer: vec![0; READ_BUFFER_SIZE],
        })
    }

    /// Adds a watch for the given path and registers its handler
    ///
    /// Registers the watch by calling [`inotify_add_watch`] and stores
    /// `handler` under the descriptor the kernel returns. From then on,
    /// every event for this watch delivered by [`poll`] is passed to
    /// `handler`, until the watch is removed or the watchdog is closed.
    ///
    /// The `mask` argument defines what kind of changes the path should be
    /// watched for, and how to do that. See [`WatchMask`] for details.
    ///
    /// Note that if `path` resolves to an inode that is already being
    /// watched (the same path twice, or a hardlink), the kernel returns the
    /// existing descriptor and this call replaces that watch's handler.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] if the watchdog has been closed; otherwise directly
    /// returns the error from the call to [`inotify_add_watch`] (invalid
    /// path, missing permission, watch limit reached, ...).
    ///
    /// [`inotify_add_watch`]: inotify_sys::inotify_add_watch
    /// [`poll`]: Watchdog::poll
    pub fn add<P, F>(&mut self, path: P, mask: WatchMask, handler: F) -> Result<WatchId, Error>
    where
        P: AsRef<Path>,
        F: FnMut(Event<&OsStr>) + 'static,
    {
        let fd = self.channel()?.clone();
        let path = CString::new(path.as_ref().as_os_str().as_bytes()).map_err(io::Error::from)?;

        let wd = unsafe { ffi::inotify_add_watch(**fd, path.as_ptr() as *const _, mask.bits()) };
        if wd == -1 {
            return Err(io::Error::last_os_error().into());
        }

        self.registry.insert(wd, Box::new(handler));

        Ok(WatchId {
            id: wd,
            fd: Arc::downgrade(&fd),
        })
    }

    /// Stops watching and releases the watch's handler
    ///
    /// Removes the watch represented by `wd` by calling
    /// [`inotify_rm_watch`] and evicts its handler from the registry. The
    /// kernel may still deliver a trailing [`EventMask::IGNORED`] record for
    /// the removed descriptor; it is dropped silently by [`poll`].
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] if the watchdog has been closed;
    /// [`Error::InvalidWatch`] if `wd` was issued by a different instance;
    /// otherwise directly returns the error from the call to
    /// [`inotify_rm_watch`], in which case the handler stays registered.
    ///
    /// [`inotify_rm_watch`]: inotify_sys::inotify_rm_watch
    /// [`poll`]: Watchdog::poll
    pub fn remove(&mut self, wd: WatchId) -> Result<(), Error> {
        let fd = self.channel()?;
        if wd.fd.upgrade().as_ref() != Some(fd) {
            return Err(Error::InvalidWatch);
        }

        let result = unsafe { ffi::inotify_rm_watch(***fd, wd.id) };
        match result {
            0 => {
                self.registry.remove(wd.id);
                Ok(())
            }
            _ => Err(io::Error::last_os_error().into()),
        }
    }

    /// Waits for events and dispatches them to their handlers
    ///
    /// Waits until the notification channel becomes readable or `timeout`
    /// elapses: `None` waits indefinitely, `Some(Duration::ZERO)` returns
    /// immediately if nothing is pending, anything else waits up to that
    /// long (millisecond granularity). On readiness, performs exactly one
    /// read, parses the buffer into events, and invokes the registered
    /// handler for each one, strictly in the order the kernel delivered
    /// them.
    ///
    /// Returns the number of bytes read, or `0` if the timeout elapsed with
    /// nothing to deliver.
    ///
    /// Events whose watch has no registered handler are dropped silently;
    /// the kernel emits such records itself (a trailing
    /// [`EventMask::IGNORED`] after a removal, or [`EventMask::Q_OVERFLOW`]
    /// under descriptor -1). A queue overflow is reported through
    /// [`tracing::warn!`] so the data loss is observable.
    ///
    /// A panicking handler is caught and reported through
    /// [`tracing::error!`]; it neither propagates out of `poll` nor stops
    /// dispatch of the remaining events. One broken callback must never
    /// stall notification delivery for the other watches sharing the
    /// channel.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] if the watchdog has been closed; [`Error::Channel`]
    /// for failures of the underlying wait or read; [`Error::Framing`] if a
    /// record overruns the read, in which case nothing from that read is
    /// dispatched.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<usize, Error> {
        let fd = self.channel()?.clone();

        let timeout_ms: c_int = match timeout {
            None => -1,
            Some(timeout) => c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX),
        };

        let mut pollfd = libc::pollfd {
            fd: **fd,
            events: libc::POLLIN,
            revents: 0,
        };

        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready == -1 {
            return Err(io::Error::last_os_error().into());
        }
        if ready == 0 {
            return Ok(0);
        }

        let num_bytes = match read_into_buffer(**fd, &mut self.buffer) {
            0 => return Ok(0),
            -1 => {
                let error = io::Error::last_os_error();
                // The channel is non-blocking; if the readiness report was
                // stale, there is simply nothing to deliver.
                if error.kind() == io::ErrorKind::WouldBlock {
                    return Ok(0);
                }
                return Err(error.into());
            }
            len => len as usize,
        };

        // Check the framing of the whole read before running any handler; a
        // corrupt buffer must not be partially dispatched.
        let events = Events::new(Arc::downgrade(&fd), &self.buffer[..num_bytes])
            .collect::<Result<Vec<_>, _>>()?;

        for event in events {
            if event.mask.contains(EventMask::Q_OVERFLOW) {
                warn!("inotify event queue overflowed, events were lost");
            }

            let id = event.wd.id;
            let Some(handler) = self.registry.lookup_mut(id) else {
                // The watch was just removed, or the record is one the
                // kernel generates on its own account. Dropping it is the
                // normal outcome.
                continue;
            };

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let reason = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("opaque panic payload");
                error!(wd = id, "watch handler panicked: {reason}");
            }
        }

        Ok(num_bytes)
    }

    /// Closes the watchdog
    ///
    /// Releases all registered handlers and closes the underlying inotify
    /// instance. Afterwards, every other operation fails with
    /// [`Error::Closed`]. Calling `close` again is a no-op returning
    /// `Ok(())`; the OS release happens at most once.
    ///
    /// # Errors
    ///
    /// Directly returns the error from the call to `close(2)`.
    pub fn close(&mut self) -> Result<(), Error> {
        let fd = match self.fd.take() {
            Some(fd) => fd,
            None => return Ok(()),
        };

        self.registry.clear();
        fd.close()?;

        Ok(())
    }

    fn channel(&self) -> Result<&Arc<FdGuard>, Error> {
        self.fd.as_ref().ok_or(Error::Closed)
    }
}
