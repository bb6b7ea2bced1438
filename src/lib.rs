#![warn(missing_docs)]

//! A filesystem change notification dispatcher built on inotify.
//!
//! [Inotify][inotify7] is a linux kernel mechanism for monitoring changes to
//! filesystems' contents. This crate wraps one inotify instance together with
//! a registry of per-watch callback handlers: register interest in a path
//! with [`Watchdog::add`], then drive delivery with [`Watchdog::poll`], which
//! waits for the kernel to report events and invokes the handler registered
//! for each one.
//!
//! ```no_run
//! use watchdog::{Watchdog, WatchMask};
//!
//! let mut watchdog = Watchdog::init()
//!     .expect("Failed to initialize inotify instance");
//!
//! watchdog
//!     .add("/tmp", WatchMask::CREATE | WatchMask::DELETE, |event| {
//!         println!("{:?}: {:?}", event.mask, event.name);
//!     })
//!     .expect("Failed to add watch");
//!
//! loop {
//!     watchdog.poll(None).expect("Failed to poll for events");
//! }
//! ```
//!
//! Handlers run synchronously on the thread that calls `poll`, in kernel
//! delivery order. A handler that panics is caught and reported through
//! [`tracing`]; it never aborts delivery of the remaining events.
//!
//! This crate deliberately stays close to the primitives: recursive
//! directory-tree watching, event debouncing, and async integration are the
//! caller's business, layered on top.
//!
//! [inotify7]: https://man7.org/linux/man-pages/man7/inotify.7.html

mod errors;
mod events;
mod fd_guard;
mod registry;
mod util;
mod watchdog;
mod watches;

pub use crate::errors::Error;
pub use crate::events::{Event, EventMask, Events};
pub use crate::registry::Handler;
pub use crate::watchdog::Watchdog;
pub use crate::watches::{WatchId, WatchMask};
