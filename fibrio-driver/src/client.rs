use std::{
    cell::{Cell, RefCell},
    future::poll_fn,
    io,
    rc::Rc,
    task::{Poll, Waker},
    time::Duration,
};

use fibrio_log::trace;

use crate::{Error, EventHandler, Events, Finalize, RawFd, Reactor, Result};

/// Readiness gate for a single file descriptor.
///
/// A client owns the descriptor's reactor registration and the identity of
/// the one task allowed to block on it. [`io_wait`](SelectClient::io_wait)
/// parks that task until the reactor reports the wanted readiness, reusing
/// the existing registration whenever the wanted mask is unchanged: two
/// back-to-back waits for the same mask cost zero registration calls.
///
/// A client serves one task at a time; interleaving waits from several
/// tasks on the same client is a logic error.
pub struct SelectClient {
    reactor: Rc<dyn Reactor>,
    shared: Rc<Shared>,
}

/// State shared with the reactor for the lifetime of a registration.
struct Shared {
    fd: RawFd,
    /// Mask currently registered with the reactor; empty means
    /// "not registered".
    expected: Cell<Events>,
    /// Single-slot mailbox between the parked task and the reactor. Taking
    /// the waker out is the hand-over.
    parked: RefCell<Option<Waker>>,
    /// Events delivered by the most recent reactor callback.
    last_events: Cell<Events>,
    /// Latched by the reactor when the registration timed out.
    timed_out: Cell<bool>,
    timeout: Cell<Option<Duration>>,
}

impl SelectClient {
    /// Create a client for `fd`, registered with nothing yet.
    pub fn new(reactor: Rc<dyn Reactor>, fd: RawFd) -> Self {
        Self {
            reactor,
            shared: Rc::new(Shared {
                fd,
                expected: Cell::new(Events::empty()),
                parked: RefCell::new(None),
                last_events: Cell::new(Events::empty()),
                timed_out: Cell::new(false),
                timeout: Cell::new(None),
            }),
        }
    }

    /// The descriptor this client waits on.
    pub fn raw_fd(&self) -> RawFd {
        self.shared.fd
    }

    /// Set the idle timeout armed on the next (re)registration. An elapsed
    /// timeout makes the pending [`io_wait`](SelectClient::io_wait) fail
    /// with [`Error::Timeout`].
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.shared.timeout.set(timeout);
    }

    /// Whether the descriptor currently holds a reactor registration.
    pub fn is_registered(&self) -> bool {
        !self.shared.expected.get().is_empty()
    }

    /// Park the current task until the reactor reports any of `wanted`.
    ///
    /// Returns the delivered mask, which may additionally carry
    /// [`Events::HANGUP`] or [`Events::ERROR`]. The registration survives
    /// the wait so the next call with the same mask reuses it.
    pub async fn io_wait(&self, wanted: Events) -> Result<Events> {
        debug_assert!(!wanted.is_empty());
        // A wait abandoned mid-flight may have left a stale waker behind.
        self.shared.parked.borrow_mut().take();

        let expected = self.shared.expected.get();
        if expected != wanted {
            let res = if expected.is_empty() {
                self.reactor.register(self.shared.clone(), wanted)
            } else {
                self.reactor.modify(self.shared.fd, wanted)
            };
            res.map_err(|e| Error::device("registering with reactor", e))?;
            self.shared.expected.set(wanted);
        }

        poll_fn(|cx| {
            if self.shared.timed_out.replace(false) {
                return Poll::Ready(Err(Error::Timeout));
            }
            let events = self.shared.last_events.replace(Events::empty());
            if !events.is_empty() {
                if events.contains(Events::ERROR) {
                    // Error delivery implicitly dropped the registration.
                    self.shared.expected.set(Events::empty());
                }
                return Poll::Ready(Ok(events));
            }
            *self.shared.parked.borrow_mut() = Some(cx.waker().clone());
            Poll::Pending
        })
        .await
    }

    /// Unconditionally drop the reactor registration. `Ok(false)` when the
    /// descriptor was not registered.
    pub fn unregister(&self) -> io::Result<bool> {
        self.shared.expected.set(Events::empty());
        self.reactor.unregister(self.shared.fd)
    }
}

impl Drop for SelectClient {
    fn drop(&mut self) {
        if self.is_registered() {
            self.unregister().ok();
        }
    }
}

impl EventHandler for Shared {
    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout.get()
    }

    fn handle(&self, events: Events) -> bool {
        match self.parked.borrow_mut().take() {
            Some(waker) => {
                self.last_events.set(self.last_events.get() | events);
                waker.wake();
                // The woken task either re-waits (and the dedup above reuses
                // this registration) or tears the client down, which
                // unregisters. Stay armed either way.
                true
            }
            None => {
                // Post-exit wake: nobody is waiting here any more.
                trace!("spurious wake on fd {}", self.fd);
                self.expected.set(Events::empty());
                false
            }
        }
    }

    fn finalize(&self, status: Finalize, events: Events) {
        match status {
            Finalize::Success => {}
            Finalize::Timeout => {
                self.expected.set(Events::empty());
                self.timed_out.set(true);
                if let Some(waker) = self.parked.borrow_mut().take() {
                    waker.wake();
                }
            }
            Finalize::Error => {
                self.expected.set(Events::empty());
                self.last_events
                    .set(self.last_events.get() | events | Events::ERROR);
                if let Some(waker) = self.parked.borrow_mut().take() {
                    waker.wake();
                }
            }
        }
    }
}
