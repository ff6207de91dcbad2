use bitflags::bitflags;

bitflags! {
    /// Readiness of one file descriptor, as requested from and delivered by
    /// the reactor.
    ///
    /// [`HANGUP`] and [`ERROR`] are delivered whether or not they were
    /// requested.
    ///
    /// [`HANGUP`]: Events::HANGUP
    /// [`ERROR`]: Events::ERROR
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Events: u8 {
        /// The descriptor has data (or a pending connection) to read.
        const READABLE = 1 << 0;
        /// The descriptor accepts writes without blocking.
        const WRITABLE = 1 << 1;
        /// The peer closed its end of the connection.
        const HANGUP = 1 << 2;
        /// The device reported an error; the registration is gone.
        const ERROR = 1 << 3;
    }
}

#[cfg(test)]
mod tests {
    use super::Events;

    #[test]
    fn default_is_empty() {
        assert!(Events::default().is_empty());
    }

    #[test]
    fn masks_compose() {
        let events = Events::READABLE | Events::HANGUP;
        assert!(events.contains(Events::READABLE));
        assert!(events.intersects(Events::READABLE | Events::WRITABLE));
        assert!(!events.contains(Events::ERROR));
    }
}
