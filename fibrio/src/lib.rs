//! fibrio is a cooperative non-blocking I/O engine.
//!
//! Application tasks issue ordinary, procedural-looking reads and writes
//! against nonblocking descriptors; the engine suspends a task whenever
//! its descriptor would block, parks it on an epoll registration, and
//! resumes it once the kernel reports readiness. Protocol-level outcomes
//! (end of flow, peer hangup, device errors, timeouts) surface as values
//! of one flat [`Error`] taxonomy.
//!
//! ```
//! use std::os::fd::{FromRawFd, OwnedFd};
//!
//! use fibrio::{Runtime, Transceiver};
//!
//! fn pipe() -> (OwnedFd, OwnedFd) {
//!     let mut fds = [0; 2];
//!     fibrio::driver::syscall!(libc::pipe2(
//!         fds.as_mut_ptr(),
//!         libc::O_NONBLOCK | libc::O_CLOEXEC
//!     ))
//!     .unwrap();
//!     unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
//! }
//!
//! let rt = Runtime::new().unwrap();
//! rt.block_on(async {
//!     let (rx, tx) = pipe();
//!     let echo = fibrio::runtime::spawn(async move {
//!         let mut writer = Transceiver::new(tx);
//!         writer.write(b"Hello World!").await.unwrap();
//!     });
//!
//!     let mut reader = Transceiver::new(rx);
//!     let mut buf = [0u8; 12];
//!     reader.read(&mut buf).await.unwrap();
//!     assert_eq!(&buf, b"Hello World!");
//!     echo.await;
//! });
//! ```

#![warn(missing_docs)]

#[doc(inline)]
pub use fibrio_driver as driver;
#[doc(inline)]
pub use fibrio_io as io;
#[doc(inline)]
pub use fibrio_log as log;
#[doc(inline)]
pub use fibrio_net as net;
#[doc(inline)]
pub use fibrio_runtime as runtime;

pub use fibrio_driver::{Error, Events, Result};
pub use fibrio_net::{connect, CorkState, IoDevice, Transceiver};
pub use fibrio_runtime::Runtime;
