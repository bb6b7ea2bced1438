use std::{
    ffi::OsStr,
    mem,
    os::unix::ffi::OsStrExt,
    sync::Weak,
};

use bitflags::bitflags;
use inotify_sys as ffi;

use crate::errors::Error;
use crate::fd_guard::FdGuard;
use crate::watches::WatchId;

/// Iterator over the event records of one read from the notification channel
///
/// Decodes the kernel's back-to-back variable-length records in a single
/// left-to-right pass. Yields `Err` if a record overruns the buffer, which
/// should not happen with a correctly sized read buffer; after an error the
/// iterator is exhausted, so a corrupt read is never partially decoded.
#[derive(Debug)]
pub struct Events<'a> {
    fd: Weak<FdGuard>,
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> Events<'a> {
    pub(crate) fn new(fd: Weak<FdGuard>, buffer: &'a [u8]) -> Self {
        Events { fd, buffer, pos: 0 }
    }
}

impl<'a> Iterator for Events<'a> {
    type Item = Result<Event<&'a OsStr>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buffer.len() {
            return None;
        }

        match Event::from_buffer(self.fd.clone(), &self.buffer[self.pos..]) {
            Some((step, event)) => {
                self.pos += step;
                Some(Ok(event))
            }
            None => {
                let offset = self.pos;
                self.pos = self.buffer.len();
                Some(Err(Error::Framing {
                    offset,
                    num_bytes: self.buffer.len(),
                }))
            }
        }
    }
}

/// One filesystem change notification
///
/// Describes a change that the user previously registered interest in. To
/// watch for events, call [`Watchdog::add`]; the registered handler receives
/// each matching `Event` from inside [`Watchdog::poll`].
///
/// [`Watchdog::add`]: crate::Watchdog::add
/// [`Watchdog::poll`]: crate::Watchdog::poll
#[derive(Clone, Debug)]
pub struct Event<S> {
    /// Identifies the watch this event originates from
    ///
    /// Equal to the [`WatchId`] that [`Watchdog::add`] returned when
    /// interest for this event was registered.
    ///
    /// [`Watchdog::add`]: crate::Watchdog::add
    pub wd: WatchId,

    /// Indicates what kind of event this is
    ///
    /// Echoes the bits requested via [`WatchMask`], possibly combined with
    /// kernel-added bits like [`EventMask::ISDIR`] or
    /// [`EventMask::IGNORED`].
    ///
    /// [`WatchMask`]: crate::WatchMask
    pub mask: EventMask,

    /// Connects related events to each other
    ///
    /// When a file is renamed, this results in two events:
    /// [`MOVED_FROM`] and [`MOVED_TO`]. The `cookie` field will be the same
    /// for both of them, thereby making it possible to connect the event
    /// pair.
    ///
    /// [`MOVED_FROM`]: EventMask::MOVED_FROM
    /// [`MOVED_TO`]: EventMask::MOVED_TO
    pub cookie: u32,

    /// The name of the file the event originates from
    ///
    /// This field is set only if the subject of the event is a file or
    /// directory in a watched directory. If the event concerns a file or
    /// directory that is watched directly, `name` will be `None`.
    pub name: Option<S>,
}

impl<'a> Event<&'a OsStr> {
    fn new(fd: Weak<FdGuard>, event: &ffi::inotify_event, name: &'a OsStr) -> Self {
        // Retain the mask bits verbatim, including any the kernel defines
        // that this crate doesn't know about yet.
        let mask = EventMask::from_bits_retain(event.mask);

        let wd = WatchId { id: event.wd, fd };

        let name = if name.is_empty() { None } else { Some(name) };

        Event {
            wd,
            mask,
            cookie: event.cookie,
            name,
        }
    }

    /// Create an `Event` from the front of `buffer`
    ///
    /// Returns the number of bytes consumed and the event, or `None` if the
    /// buffer is too short to hold a full record (a framing error at this
    /// offset).
    fn from_buffer(fd: Weak<FdGuard>, buffer: &'a [u8]) -> Option<(usize, Self)> {
        let header_size = mem::size_of::<ffi::inotify_event>();

        if buffer.len() < header_size {
            return None;
        }

        // We know there are enough bytes in the buffer for a header, so the
        // read is in bounds. `read_unaligned` is required since the byte
        // buffer has alignment 1 while `inotify_event` has a higher
        // alignment, which makes a plain dereference undefined behavior.
        let ffi_event_ptr = buffer.as_ptr() as *const ffi::inotify_event;
        let ffi_event = unsafe { ffi_event_ptr.read_unaligned() };

        // The name's length is given by `event.len`. The record is truncated
        // if the name doesn't fit in what's left of the buffer.
        let bytes_consumed = header_size + ffi_event.len as usize;
        if buffer.len() < bytes_consumed {
            return None;
        }

        // Directly after the header come `len` bytes of name, filled up with
        // '\0' to the producer's alignment boundary. Trim at the first '\0';
        // the `unwrap` is safe because `splitn` always returns at least one
        // result, even if the slice contains no '\0'.
        let name = &buffer[header_size..bytes_consumed];
        let name = name.splitn(2, |b| b == &0u8).next().unwrap();

        let event = Event::new(fd, &ffi_event, OsStr::from_bytes(name));

        Some((bytes_consumed, event))
    }
}

bitflags! {
    /// Indicates the type of an event
    ///
    /// Retrieved from an [`Event`] via its `mask` field. The bit values are
    /// the kernel's own `IN_*` values. Determine the [`Event`]'s type by
    /// comparing against the associated constants with
    /// [`EventMask::contains`].
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

        /// Watch was removed
        ///
        /// Generated when the watch was removed explicitly (via
        /// [`Watchdog::remove`]) or automatically (because the file was
        /// deleted or the file system was unmounted). May arrive after the
        /// handler has already been evicted, in which case it is dropped.
        ///
        /// [`Watchdog::remove`]: crate::Watchdog::remove
        const IGNORED = ffi::IN_IGNORED;

        /// Event related to a directory
        ///
        /// The subject of the event is a directory.
        const ISDIR = ffi::IN_ISDIR;

        /// Event queue overflowed
        ///
        /// The event queue has overflowed and events have presumably been
        /// lost. Delivered with a watch descriptor of -1, which no handler
        /// is registered under.
        const Q_OVERFLOW = ffi::IN_Q_OVERFLOW;

        /// File system containing watched object was unmounted
        ///
        /// An event with [`EventMask::IGNORED`] will subsequently be
        /// generated for the same watch descriptor.
        const UNMOUNT = ffi::IN_UNMOUNT;
    }
}

#[cfg(test)]
mod tests {
    use std::{io::prelude::*, mem, slice, sync};

    use inotify_sys as ffi;

    use crate::errors::Error;

    use super::{Event, EventMask, Events};

    fn write_event(buffer: &mut [u8], wd: i32, mask: u32, cookie: u32, name: &[u8]) -> usize {
        let header = ffi::inotify_event {
            wd,
            mask,
            cookie,
            len: name.len() as u32,
        };
        let header_bytes = unsafe {
            slice::from_raw_parts(&header as *const _ as *const u8, mem::size_of_val(&header))
        };

        let mut cursor = &mut buffer[..];
        cursor
            .write_all(header_bytes)
            .expect("Failed to write into buffer");
        cursor.write_all(name).expect("Failed to write into buffer");

        mem::size_of_val(&header) + name.len()
    }

    #[test]
    fn from_buffer_should_not_mistake_next_event_for_name_of_previous_event() {
        let mut buffer = [0u8; 1024];

        // First, put a normal event with no name into the buffer, then
        // simulate a next event that starts with a non-zero byte.
        let len = write_event(&mut buffer, 0, 0, 0, b"");
        buffer[len] = 1;

        let (_, event) =
            Event::from_buffer(sync::Weak::new(), &buffer).expect("Expected a full event");
        assert_eq!(event.name, None);
    }

    #[test]
    fn parses_back_to_back_records_in_order() {
        let mut buffer = [0u8; 1024];

        let first = write_event(&mut buffer, 1, ffi::IN_CREATE, 0, b"first\0\0\0");
        let second = write_event(&mut buffer[first..], 2, ffi::IN_DELETE, 0, b"second\0\0");

        let events = Events::new(sync::Weak::new(), &buffer[..first + second])
            .collect::<Result<Vec<_>, _>>()
            .expect("Expected well-framed events");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].wd.id(), 1);
        assert_eq!(events[0].mask, EventMask::CREATE);
        assert_eq!(events[0].name.unwrap(), "first");
        assert_eq!(events[1].wd.id(), 2);
        assert_eq!(events[1].mask, EventMask::DELETE);
        assert_eq!(events[1].name.unwrap(), "second");
    }

    #[test]
    fn all_padding_name_is_reported_as_absent() {
        let mut buffer = [0u8; 1024];
        let len = write_event(&mut buffer, 3, ffi::IN_ATTRIB, 0, b"\0\0\0\0");

        let (_, event) =
            Event::from_buffer(sync::Weak::new(), &buffer[..len]).expect("Expected a full event");
        assert_eq!(event.name, None);
    }

    #[test]
    fn mask_bits_are_retained_verbatim() {
        let mut buffer = [0u8; 1024];
        let mask = ffi::IN_CREATE | ffi::IN_ISDIR;
        let len = write_event(&mut buffer, 1, mask, 0, b"");

        let (_, event) =
            Event::from_buffer(sync::Weak::new(), &buffer[..len]).expect("Expected a full event");
        assert_eq!(event.mask.bits(), mask);
        assert!(event.mask.contains(EventMask::CREATE));
        assert!(event.mask.contains(EventMask::ISDIR));
    }

    #[test]
    fn truncated_header_is_a_framing_error() {
        let buffer = [0u8; 7];

        let mut events = Events::new(sync::Weak::new(), &buffer);
        assert!(matches!(
            events.next(),
            Some(Err(Error::Framing {
                offset: 0,
                num_bytes: 7,
            }))
        ));
        assert!(events.next().is_none());
    }

    #[test]
    fn truncated_name_is_a_framing_error() {
        let mut buffer = [0u8; 1024];
        let good = write_event(&mut buffer, 1, ffi::IN_CREATE, 0, b"ok\0\0");

        // Claim a name longer than what's left of the read.
        let header = ffi::inotify_event {
            wd: 2,
            mask: ffi::IN_CREATE,
            cookie: 0,
            len: 4096,
        };
        let header_bytes = unsafe {
            slice::from_raw_parts(&header as *const _ as *const u8, mem::size_of_val(&header))
        };
        buffer[good..good + header_bytes.len()].copy_from_slice(header_bytes);
        let num_bytes = good + header_bytes.len();

        let mut events = Events::new(sync::Weak::new(), &buffer[..num_bytes]);
        assert!(matches!(events.next(), Some(Ok(_))));
        assert!(matches!(
            events.next(),
            Some(Err(Error::Framing { offset, num_bytes: n })) if offset == good && n == num_bytes
        ));
        assert!(events.next().is_none());
    }

    #[test]
    fn cookie_correlates_move_pairs() {
        let mut buffer = [0u8; 1024];
        let first = write_event(&mut buffer, 1, ffi::IN_MOVED_FROM, 42, b"old\0");
        let second = write_event(&mut buffer[first..], 1, ffi::IN_MOVED_TO, 42, b"new\0");

        let events = Events::new(sync::Weak::new(), &buffer[..first + second])
            .collect::<Result<Vec<_>, _>>()
            .expect("Expected well-framed events");

        assert_eq!(events[0].cookie, events[1].cookie);
        assert_eq!(events[0].cookie, 42);
    }
}
