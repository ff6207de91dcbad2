use std::{
    cell::RefCell,
    collections::HashMap,
    io,
    mem,
    os::fd::FromRawFd,
    rc::Rc,
    time::{Duration, Instant},
};

use fibrio_log::{instrument, trace};

use crate::{AsRawFd, EventHandler, Events, Finalize, OwnedFd, RawFd, Reactor};

struct Entry {
    handler: Rc<dyn EventHandler>,
    interest: Events,
    deadline: Option<Instant>,
}

/// Level-triggered epoll event loop.
///
/// Registrations are persistent: a descriptor stays armed until its handler
/// asks to be dropped, an error is delivered, its timeout expires, or it is
/// explicitly unregistered. This is what lets back-to-back waits on the
/// same descriptor reuse one kernel registration.
///
/// The dispatcher is not a scheduler. [`dispatch`](Dispatcher::dispatch)
/// translates kernel events into [`EventHandler`] callbacks and returns;
/// interleaving it with task execution is the runtime's job.
pub struct Dispatcher {
    epoll: OwnedFd,
    registry: RefCell<HashMap<RawFd, Entry>>,
    events: RefCell<Vec<libc::epoll_event>>,
    capacity: usize,
}

impl Dispatcher {
    /// Create a dispatcher with the default event batch size.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(256)
    }

    /// Create a dispatcher reading at most `capacity` kernel events per
    /// [`dispatch`](Dispatcher::dispatch) call.
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        let epoll = syscall!(libc::epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Self {
            // SAFETY: epoll_create1 returned a fresh descriptor we own.
            epoll: unsafe { OwnedFd::from_raw_fd(epoll) },
            registry: RefCell::new(HashMap::new()),
            events: RefCell::new(Vec::with_capacity(capacity)),
            capacity,
        })
    }

    /// Whether `fd` currently holds a registration.
    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.registry.borrow().contains_key(&fd)
    }

    /// The event mask `fd` is currently registered for, if any.
    pub fn registered_interest(&self, fd: RawFd) -> Option<Events> {
        self.registry.borrow().get(&fd).map(|entry| entry.interest)
    }

    fn interest(events: Events) -> u32 {
        let mut mask = 0;
        if events.contains(Events::READABLE) {
            mask |= libc::EPOLLIN | libc::EPOLLRDHUP;
        }
        if events.contains(Events::WRITABLE) {
            mask |= libc::EPOLLOUT;
        }
        mask as u32
    }

    fn translate(mask: u32) -> Events {
        let mut events = Events::empty();
        if mask & (libc::EPOLLIN | libc::EPOLLPRI) as u32 != 0 {
            events |= Events::READABLE;
        }
        if mask & libc::EPOLLOUT as u32 != 0 {
            events |= Events::WRITABLE;
        }
        if mask & (libc::EPOLLHUP | libc::EPOLLRDHUP) as u32 != 0 {
            events |= Events::HANGUP;
        }
        if mask & libc::EPOLLERR as u32 != 0 {
            events |= Events::ERROR;
        }
        events
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: Events) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: Self::interest(events),
            u64: fd as u64,
        };
        syscall!(libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event))?;
        Ok(())
    }

    /// Drop `fd` from the registry and the kernel set, returning its entry.
    fn remove(&self, fd: RawFd) -> Option<Entry> {
        let entry = self.registry.borrow_mut().remove(&fd)?;
        // The kernel forgets closed descriptors on its own, so a failing
        // delete only means we raced with a close.
        self.ctl(libc::EPOLL_CTL_DEL, fd, Events::empty()).ok();
        Some(entry)
    }

    fn refresh_deadline(&self, fd: RawFd) {
        if let Some(entry) = self.registry.borrow_mut().get_mut(&fd) {
            entry.deadline = entry.handler.timeout().map(|t| Instant::now() + t);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.registry.borrow().values().filter_map(|e| e.deadline).min()
    }

    /// Clamp `timeout` so the wait wakes up for the nearest registration
    /// deadline.
    fn clamp_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        match self.next_deadline() {
            None => timeout,
            Some(deadline) => {
                let until = deadline.saturating_duration_since(Instant::now());
                Some(timeout.map_or(until, |t| t.min(until)))
            }
        }
    }

    fn expire(&self) {
        let now = Instant::now();
        let expired: Vec<RawFd> = self
            .registry
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.deadline.is_some_and(|d| d <= now))
            .map(|(&fd, _)| fd)
            .collect();
        for fd in expired {
            if let Some(entry) = self.remove(fd) {
                trace!("fd {fd} timed out");
                entry.handler.finalize(Finalize::Timeout, Events::empty());
            }
        }
    }

    /// Wait up to `timeout` for readiness and deliver it to the registered
    /// handlers. `None` blocks until the next event or registration
    /// deadline. Returns the number of kernel events processed.
    pub fn dispatch(&self, timeout: Option<Duration>) -> io::Result<usize> {
        instrument!(fibrio_log::Level::TRACE, "dispatch");
        let millis = match self.clamp_timeout(timeout) {
            None => -1,
            Some(t) => i32::try_from(t.as_millis()).unwrap_or(i32::MAX),
        };

        let mut events = mem::take(&mut *self.events.borrow_mut());
        events.clear();
        let n = match syscall!(libc::epoll_wait(
            self.epoll.as_raw_fd(),
            events.as_mut_ptr(),
            self.capacity as libc::c_int,
            millis,
        )) {
            Ok(n) => n as usize,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
            Err(e) => {
                *self.events.borrow_mut() = events;
                return Err(e);
            }
        };
        // SAFETY: the kernel initialized the first n entries.
        unsafe { events.set_len(n) };

        for event in &events {
            let fd = event.u64 as RawFd;
            let delivered = Self::translate(event.events);
            trace!("fd {fd}: {delivered:?}");
            let handler = match self.registry.borrow().get(&fd) {
                Some(entry) => entry.handler.clone(),
                None => {
                    trace!("event for unregistered fd {fd}");
                    continue;
                }
            };
            if delivered.contains(Events::ERROR) {
                self.remove(fd);
                handler.finalize(Finalize::Error, delivered);
            } else if handler.handle(delivered) {
                self.refresh_deadline(fd);
            } else {
                self.remove(fd);
                handler.finalize(Finalize::Success, Events::empty());
            }
        }

        *self.events.borrow_mut() = events;
        self.expire();
        Ok(n)
    }
}

impl Reactor for Dispatcher {
    fn register(&self, handler: Rc<dyn EventHandler>, events: Events) -> io::Result<()> {
        let fd = handler.raw_fd();
        if self.registry.borrow().contains_key(&fd) {
            return Err(io::ErrorKind::AlreadyExists.into());
        }
        self.ctl(libc::EPOLL_CTL_ADD, fd, events)?;
        let deadline = handler.timeout().map(|t| Instant::now() + t);
        trace!("registered fd {fd} for {events:?}");
        self.registry.borrow_mut().insert(
            fd,
            Entry {
                handler,
                interest: events,
                deadline,
            },
        );
        Ok(())
    }

    fn modify(&self, fd: RawFd, events: Events) -> io::Result<()> {
        let mut registry = self.registry.borrow_mut();
        let entry = registry
            .get_mut(&fd)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        self.ctl(libc::EPOLL_CTL_MOD, fd, events)?;
        trace!("modified fd {fd} to {events:?}");
        entry.interest = events;
        entry.deadline = entry.handler.timeout().map(|t| Instant::now() + t);
        Ok(())
    }

    fn unregister(&self, fd: RawFd) -> io::Result<bool> {
        match self.remove(fd) {
            Some(entry) => {
                trace!("unregistered fd {fd}");
                entry.handler.finalize(Finalize::Success, Events::empty());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl AsRawFd for Dispatcher {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        for fd in self.registry.borrow().keys() {
            self.ctl(libc::EPOLL_CTL_DEL, *fd, Events::empty()).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        syscall!(libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC)).unwrap();
        // SAFETY: pipe2 returned two fresh descriptors we own.
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    struct Recorder {
        fd: RawFd,
        timeout: Option<Duration>,
        delivered: Cell<Events>,
        finalized: Cell<Option<Finalize>>,
        keep: bool,
    }

    impl Recorder {
        fn new(fd: RawFd, timeout: Option<Duration>, keep: bool) -> Rc<Self> {
            Rc::new(Self {
                fd,
                timeout,
                delivered: Cell::new(Events::empty()),
                finalized: Cell::new(None),
                keep,
            })
        }
    }

    impl EventHandler for Recorder {
        fn raw_fd(&self) -> RawFd {
            self.fd
        }

        fn timeout(&self) -> Option<Duration> {
            self.timeout
        }

        fn handle(&self, events: Events) -> bool {
            self.delivered.set(self.delivered.get() | events);
            self.keep
        }

        fn finalize(&self, status: Finalize, _events: Events) {
            self.finalized.set(Some(status));
        }
    }

    #[test]
    fn delivers_readable() {
        let dispatcher = Dispatcher::new().unwrap();
        let (rx, tx) = pipe();
        let recorder = Recorder::new(rx.as_raw_fd(), None, false);
        dispatcher
            .register(recorder.clone(), Events::READABLE)
            .unwrap();

        syscall!(libc::write(tx.as_raw_fd(), b"x".as_ptr().cast(), 1)).unwrap();
        dispatcher.dispatch(Some(Duration::from_secs(1))).unwrap();

        assert!(recorder.delivered.get().contains(Events::READABLE));
        // The handler declined to stay registered.
        assert!(!dispatcher.is_registered(rx.as_raw_fd()));
        assert_eq!(recorder.finalized.get(), Some(Finalize::Success));
    }

    #[test]
    fn persistent_registration_redelivers() {
        let dispatcher = Dispatcher::new().unwrap();
        let (rx, tx) = pipe();
        let recorder = Recorder::new(rx.as_raw_fd(), None, true);
        dispatcher
            .register(recorder.clone(), Events::READABLE)
            .unwrap();

        syscall!(libc::write(tx.as_raw_fd(), b"x".as_ptr().cast(), 1)).unwrap();
        dispatcher.dispatch(Some(Duration::from_secs(1))).unwrap();
        assert!(dispatcher.is_registered(rx.as_raw_fd()));

        // Level-triggered: unread data fires again.
        recorder.delivered.set(Events::empty());
        dispatcher.dispatch(Some(Duration::from_secs(1))).unwrap();
        assert!(recorder.delivered.get().contains(Events::READABLE));
    }

    #[test]
    fn timeout_finalizes() {
        let dispatcher = Dispatcher::new().unwrap();
        let (rx, _tx) = pipe();
        let recorder = Recorder::new(rx.as_raw_fd(), Some(Duration::from_millis(10)), true);
        dispatcher
            .register(recorder.clone(), Events::READABLE)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while recorder.finalized.get().is_none() && Instant::now() < deadline {
            dispatcher.dispatch(Some(Duration::from_millis(50))).unwrap();
        }

        assert_eq!(recorder.finalized.get(), Some(Finalize::Timeout));
        assert!(!dispatcher.is_registered(rx.as_raw_fd()));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let dispatcher = Dispatcher::new().unwrap();
        let (rx, _tx) = pipe();
        let recorder = Recorder::new(rx.as_raw_fd(), None, true);
        dispatcher
            .register(recorder.clone(), Events::READABLE)
            .unwrap();
        let err = dispatcher
            .register(recorder.clone(), Events::READABLE)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(
            dispatcher.registered_interest(rx.as_raw_fd()),
            Some(Events::READABLE)
        );

        assert!(dispatcher.unregister(rx.as_raw_fd()).unwrap());
        assert!(!dispatcher.unregister(rx.as_raw_fd()).unwrap());
    }
}
