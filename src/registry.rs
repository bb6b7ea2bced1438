use std::{collections::HashMap, ffi::OsStr, fmt, os::raw::c_int};

use crate::events::Event;

/// A watch's event handler
///
/// Any callable taking one [`Event`] qualifies: closures, function pointers,
/// and bound methods alike. The registry owns the handler for as long as the
/// watch is active; removing the watch or closing the watchdog releases it.
pub type Handler = Box<dyn FnMut(Event<&OsStr>)>;

/// Maps watch descriptors to their handlers
///
/// Keys are the raw descriptors assigned by the kernel, which are unique
/// among live watches of one inotify instance. Lookups for absent ids are a
/// normal outcome during dispatch (the watch was just removed, or the kernel
/// emitted a trailing IGNORED), never an error.
#[derive(Default)]
pub(crate) struct Registry {
    handlers: HashMap<c_int, Handler>,
}

impl Registry {
    pub(crate) fn insert(&mut self, id: c_int, handler: Handler) {
        // The kernel never returns the id of a live watch twice, so an
        // overwrite can only replace a handler that was already evicted.
        self.handlers.insert(id, handler);
    }

    pub(crate) fn remove(&mut self, id: c_int) {
        self.handlers.remove(&id);
    }

    pub(crate) fn lookup_mut(&mut self, id: c_int) -> Option<&mut Handler> {
        self.handlers.get_mut(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc, sync::Weak};

    use crate::events::{Event, EventMask};
    use crate::watches::WatchId;

    use super::Registry;

    fn dummy_event(id: i32) -> Event<&'static std::ffi::OsStr> {
        Event {
            wd: WatchId {
                id,
                fd: Weak::new(),
            },
            mask: EventMask::empty(),
            cookie: 0,
            name: None,
        }
    }

    #[test]
    fn lookup_finds_the_inserted_handler() {
        let mut registry = Registry::default();
        let calls = Rc::new(Cell::new(0));

        let recorded = calls.clone();
        registry.insert(7, Box::new(move |_| recorded.set(recorded.get() + 1)));

        let handler = registry.lookup_mut(7).expect("Expected handler");
        handler(dummy_event(7));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn lookup_of_absent_id_is_none() {
        let mut registry = Registry::default();
        assert!(registry.lookup_mut(-1).is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = Registry::default();
        registry.insert(7, Box::new(|_| {}));

        registry.remove(7);
        assert!(registry.lookup_mut(7).is_none());

        // Removing an absent id is not an error at this layer.
        registry.remove(7);
    }

    #[test]
    fn clear_evicts_all_handlers() {
        let mut registry = Registry::default();
        registry.insert(1, Box::new(|_| {}));
        registry.insert(2, Box::new(|_| {}));

        registry.clear();
        assert!(registry.lookup_mut(1).is_none());
        assert!(registry.lookup_mut(2).is_none());
    }
}
