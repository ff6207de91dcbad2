use std::io;

use fibrio_driver::{Events, Result};

use crate::{
    stream::{check_events, enrich},
    IoDevice, Transceiver,
};

/// Drive a nonblocking `connect(2)` to completion through the readiness
/// machinery.
///
/// `call_connect` performs the actual `connect` call on the device (for a
/// [`socket2::Socket`] that is `|s| s.connect(&addr)`). When the kernel
/// answers `EINPROGRESS`, the calling task is suspended until the socket
/// turns writable; an error event during that wait fails with the pending
/// `SO_ERROR` attached.
///
/// Returns the errno observed on the initial attempt (`0` when the
/// connection was established on the spot), so callers can tell the two
/// success paths apart.
///
/// Whether a nonblocking `connect` can actually return `EINTR` is murky in
/// POSIX; it is treated exactly like `EINPROGRESS` here.
pub async fn connect<D, F>(stream: &Transceiver<D>, mut call_connect: F) -> Result<i32>
where
    D: IoDevice,
    F: FnMut(&D) -> io::Result<()>,
{
    let err = match call_connect(stream.device()) {
        Ok(()) => return Ok(0),
        Err(err) => err,
    };
    let errno = err.raw_os_error().unwrap_or(0);
    match errno {
        libc::EINPROGRESS | libc::EALREADY | libc::EINTR => {
            let events = stream.select_client().io_wait(Events::WRITABLE).await?;
            check_events(stream.device(), events, Events::WRITABLE, "establishing connection")?;
            Ok(errno)
        }
        // Usable as-is: raced with an earlier attempt that already won.
        0 | libc::EISCONN => Ok(errno),
        _ => Err(enrich(stream.device(), "establishing connection", err)),
    }
}
