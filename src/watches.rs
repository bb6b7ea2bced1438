use std::{
    cmp::Ordering,
    hash::{Hash, Hasher},
    os::raw::c_int,
    sync::Weak,
};

use bitflags::bitflags;
use inotify_sys as ffi;

use crate::fd_guard::FdGuard;

bitflags! {
    /// Describes a file system watch
    ///
    /// Passed to [`Watchdog::add`] to describe what file system events to
    /// watch for, and how to do that. Constants can be combined freely:
    ///
    /// ```
    /// use watchdog::WatchMask;
    ///
    /// let mask = WatchMask::CREATE | WatchMask::DELETE;
    /// ```
    ///
    /// The bit values are the kernel's own `IN_*` values, so a mask composed
    /// here matches the masks in inotify documentation and tooling bit for
    /// bit, and the mask delivered in an [`Event`] echoes the bits requested
    /// here.
    ///
    /// [`Watchdog::add`]: crate::Watchdog::add
    /// [`Event`]: crate::Event
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct WatchMask: u32 {
        /// File was accessed
        ///
        /// When watching a directory, this event is only triggered for
        /// objects inside the directory, not the directory itself.
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

        /// Watch for all events
        ///
        /// Combination of all the event constants above.
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

/// Identifies a registered watch
///
/// Returned by [`Watchdog::add`] and carried by every [`Event`], connecting
/// the event back to the watch (and handler) it originates from. Can be
/// passed to [`Watchdog::remove`] to stop watching.
///
/// A `WatchId` is scoped to the instance that issued it; ids from different
/// instances never compare equal, even if the kernel happened to assign the
/// same numeric descriptor.
///
/// [`Watchdog::add`]: crate::Watchdog::add
/// [`Watchdog::remove`]: crate::Watchdog::remove
/// [`Event`]: crate::Event
#[derive(Clone, Debug)]
pub struct WatchId {
    pub(crate) id: c_int,
    pub(crate) fd: Weak<FdGuard>,
}

impl WatchId {
    /// Returns the raw watch descriptor assigned by the kernel
    ///
    /// Can be used to distinguish events for files with the same name.
    pub fn id(&self) -> c_int {
        self.id
    }
}

impl Eq for WatchId {}

impl PartialEq for WatchId {
    fn eq(&self, other: &Self) -> bool {
        let self_fd = self.fd.upgrade();
        let other_fd = other.fd.upgrade();

        self.id == other.id && self_fd.is_some() && self_fd == other_fd
    }
}

impl Ord for WatchId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for WatchId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for WatchId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Only `self.id` is hashed, as `self.fd` is a weak pointer that
        // might no longer be available, and a hash must not change over the
        // value's lifetime.
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use inotify_sys as ffi;

    use super::WatchMask;

    #[test]
    fn mask_constants_match_the_kernel_values() {
        assert_eq!(WatchMask::ACCESS.bits(), ffi::IN_ACCESS);
        assert_eq!(WatchMask::MODIFY.bits(), ffi::IN_MODIFY);
        assert_eq!(WatchMask::CREATE.bits(), ffi::IN_CREATE);
        assert_eq!(WatchMask::DELETE.bits(), ffi::IN_DELETE);
        assert_eq!(WatchMask::ONESHOT.bits(), ffi::IN_ONESHOT);
    }

    #[test]
    fn compound_masks_cover_their_parts() {
        assert_eq!(
            WatchMask::MOVE,
            WatchMask::MOVED_FROM | WatchMask::MOVED_TO
        );
        assert_eq!(
            WatchMask::CLOSE,
            WatchMask::CLOSE_WRITE | WatchMask::CLOSE_NOWRITE
        );
        assert!(WatchMask::ALL_EVENTS.contains(WatchMask::MODIFY | WatchMask::DELETE_SELF));
    }
}
