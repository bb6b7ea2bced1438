use std::{
    io,
    ops::Deref,
    os::unix::io::RawFd,
    sync::atomic::{AtomicBool, Ordering},
};

/// Owns the file descriptor of one inotify instance
///
/// The descriptor is closed at most once: either through an explicit call to
/// [`FdGuard::close`], which reports failures, or on drop as a safety net.
/// After it has been closed, the descriptor value is never touched again.
#[derive(Debug)]
pub(crate) struct FdGuard {
    fd: RawFd,
    close_on_drop: AtomicBool,
}

impl FdGuard {
    pub(crate) fn new(fd: RawFd) -> Self {
        FdGuard {
            fd,
            close_on_drop: AtomicBool::new(true),
        }
    }

    /// Closes the descriptor
    ///
    /// Idempotent: only the first call issues `close(2)`; later calls (and
    /// the drop handler) are no-ops.
    pub(crate) fn close(&self) -> io::Result<()> {
        if self.close_on_drop.swap(false, Ordering::AcqRel) {
            match unsafe { libc::close(self.fd) } {
                0 => Ok(()),
                _ => Err(io::Error::last_os_error()),
            }
        } else {
            Ok(())
        }
    }
}

impl Deref for FdGuard {
    type Target = RawFd;

    fn deref(&self) -> &Self::Target {
        &self.fd
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        // Explicit `close` is the error-reporting path; here we can only
        // release the descriptor and move on.
        let _ = self.close();
    }
}

impl PartialEq for FdGuard {
    fn eq(&self, other: &Self) -> bool {
        self.fd == other.fd
    }
}

impl Eq for FdGuard {}
