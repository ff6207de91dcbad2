use std::{io, mem, rc::Rc};

use fibrio_driver::{syscall, AsRawFd, BorrowedFd, OwnedFd};

/// Byte-level device capability consumed by [`Transceiver`].
///
/// The default methods issue the plain POSIX calls on
/// [`as_raw_fd`](AsRawFd::as_raw_fd); implementors only override when the
/// descriptor needs something else (`recv` flags, TLS framing, ...). All
/// return values follow POSIX: `Ok(0)` from [`read`](IoDevice::read) is
/// end of flow, `WouldBlock` means the caller should wait for readiness.
///
/// A device is borrowed, not owned, by the engine: hand over an [`Rc`] or
/// a [`BorrowedFd`] when the descriptor's lifetime is managed elsewhere.
///
/// [`Transceiver`]: crate::Transceiver
pub trait IoDevice: AsRawFd {
    /// `read(2)` into `dst`.
    fn read(&self, dst: &mut [u8]) -> io::Result<usize> {
        syscall!(libc::read(
            self.as_raw_fd(),
            dst.as_mut_ptr().cast(),
            dst.len()
        ))
        .map(|n| n as usize)
    }

    /// `write(2)` from `src`.
    fn write(&self, src: &[u8]) -> io::Result<usize> {
        syscall!(libc::write(
            self.as_raw_fd(),
            src.as_ptr().cast(),
            src.len()
        ))
        .map(|n| n as usize)
    }

    /// `readv(2)` filling `head` to exhaustion before spilling into `tail`.
    fn read_vectored(&self, head: &mut [u8], tail: &mut [u8]) -> io::Result<usize> {
        let mut iov = [
            libc::iovec {
                iov_base: head.as_mut_ptr().cast(),
                iov_len: head.len(),
            },
            libc::iovec {
                iov_base: tail.as_mut_ptr().cast(),
                iov_len: tail.len(),
            },
        ];
        syscall!(libc::readv(self.as_raw_fd(), iov.as_mut_ptr(), 2)).map(|n| n as usize)
    }

    /// The pending asynchronous socket error (`SO_ERROR`), used to enrich
    /// diagnostics before a failure is surfaced. `None` for descriptors
    /// that are not sockets or have nothing pending.
    fn take_error(&self) -> Option<io::Error> {
        let mut code: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        let res = syscall!(libc::getsockopt(
            self.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            std::ptr::addr_of_mut!(code).cast(),
            &mut len,
        ));
        match res {
            Ok(_) if code != 0 => Some(io::Error::from_raw_os_error(code)),
            _ => None,
        }
    }
}

impl IoDevice for socket2::Socket {}
impl IoDevice for OwnedFd {}
impl IoDevice for BorrowedFd<'_> {}

impl<D: IoDevice> IoDevice for Rc<D> {}

#[cfg(test)]
mod tests {
    use std::os::fd::FromRawFd;

    use super::*;

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        syscall!(libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC)).unwrap();
        // SAFETY: pipe2 returned two fresh descriptors we own.
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn pipe_round_trip() {
        let (rx, tx) = pipe();
        assert_eq!(tx.write(b"abc").unwrap(), 3);

        let mut buf = [0u8; 8];
        assert_eq!(rx.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");

        let err = rx.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn vectored_read_spills_into_tail() {
        let (rx, tx) = pipe();
        tx.write(b"headtail").unwrap();

        let mut head = [0u8; 4];
        let mut tail = [0u8; 8];
        let n = rx.read_vectored(&mut head, &mut tail).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&head, b"head");
        assert_eq!(&tail[..4], b"tail");
    }

    #[test]
    fn take_error_is_none_for_pipes() {
        let (rx, _tx) = pipe();
        assert!(rx.take_error().is_none());
    }
}
