use std::{io, rc::Rc, time::Duration};

use crate::{Events, RawFd};

/// Why a registration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalize {
    /// The registration was torn down in an orderly way.
    Success,
    /// The per-registration timeout elapsed before any I/O event.
    Timeout,
    /// The reactor observed a device error and dropped the registration.
    Error,
}

/// A party registered with a [`Reactor`] for one file descriptor.
///
/// The reactor keeps a non-owning (shared) reference to the handler for the
/// lifetime of the registration and invokes it strictly from the dispatch
/// loop, never reentrantly from a registration call.
pub trait EventHandler {
    /// The descriptor this handler is interested in.
    fn raw_fd(&self) -> RawFd;

    /// Idle timeout for the registration, armed when the handler is
    /// (re)registered and refreshed on every delivery.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Readiness delivery. Returning `false` asks the reactor to drop the
    /// registration.
    fn handle(&self, events: Events) -> bool;

    /// Terminal callback: the registration ended for `status`. On
    /// [`Finalize::Error`] the delivered events are passed along.
    fn finalize(&self, status: Finalize, events: Events);
}

/// Registration surface of an event loop.
///
/// [`Dispatcher`] is the epoll implementation; tests substitute recording
/// mocks.
///
/// [`Dispatcher`]: crate::Dispatcher
pub trait Reactor {
    /// Register `handler` for `events`. Fails with
    /// [`std::io::ErrorKind::AlreadyExists`] when the fd is registered.
    fn register(&self, handler: Rc<dyn EventHandler>, events: Events) -> io::Result<()>;

    /// Replace the event mask of an existing registration.
    fn modify(&self, fd: RawFd, events: Events) -> io::Result<()>;

    /// Drop the registration of `fd`. `Ok(false)` when it was not
    /// registered; the handler's [`finalize`](EventHandler::finalize) is
    /// invoked with [`Finalize::Success`] when it was.
    fn unregister(&self, fd: RawFd) -> io::Result<bool>;
}
