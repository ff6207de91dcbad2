use std::io;

use thiserror::Error;

/// Result alias used throughout the fibrio crates.
pub type Result<T> = std::result::Result<T, Error>;

/// The flat error taxonomy of the engine.
///
/// [`EndOfFlow`] and [`Hangup`] are protocol-level warnings: the peer ended
/// the conversation in an orderly way. Everything else is a hard failure of
/// the device or the wait itself.
///
/// [`EndOfFlow`]: Error::EndOfFlow
/// [`Hangup`]: Error::Hangup
#[derive(Debug, Error)]
pub enum Error {
    /// `read(2)` returned 0 before the request was satisfied.
    #[error("end of flow whilst reading")]
    EndOfFlow,

    /// The reactor delivered a hangup and no further progress is possible.
    #[error("connection hung up")]
    Hangup,

    /// The per-descriptor timeout elapsed before any I/O event.
    #[error("I/O wait timed out")]
    Timeout,

    /// A device operation failed, either straight from the syscall or
    /// reported back through the reactor.
    #[error("error {op}: {source}")]
    Device {
        /// What the engine was doing, e.g. `"reading from device"`.
        op: &'static str,
        /// The failure, enriched from `SO_ERROR` when available.
        source: io::Error,
    },
}

impl Error {
    /// Shorthand for a [`Device`](Error::Device) error.
    pub fn device(op: &'static str, source: io::Error) -> Self {
        Self::Device { op, source }
    }

    /// Whether this is one of the orderly end-of-conversation outcomes.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::EndOfFlow | Self::Hangup)
    }

    /// The raw OS error code, when one is attached.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Device { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::EndOfFlow => io::Error::new(io::ErrorKind::UnexpectedEof, err.to_string()),
            Error::Hangup => io::Error::new(io::ErrorKind::ConnectionAborted, err.to_string()),
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, err.to_string()),
            Error::Device { source, .. } => source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(Error::EndOfFlow.to_string(), "end of flow whilst reading");
        assert_eq!(Error::Hangup.to_string(), "connection hung up");
        let err = Error::device(
            "establishing connection",
            io::Error::from_raw_os_error(libc::ECONNREFUSED),
        );
        assert!(err.to_string().starts_with("error establishing connection"));
        assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));
    }

    #[test]
    fn warnings_are_classified() {
        assert!(Error::EndOfFlow.is_warning());
        assert!(Error::Hangup.is_warning());
        assert!(!Error::Timeout.is_warning());
        assert!(!Error::device("writing to device", io::Error::from_raw_os_error(libc::EPIPE)).is_warning());
    }
}
