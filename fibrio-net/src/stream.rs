use std::{cell::Cell, io, rc::Rc, time::Duration};

use bytemuck::Pod;
use fibrio_driver::{AsRawFd, Error, Events, Reactor, Result, SelectClient};
use fibrio_io::{BufferedReader, RawRead, DEFAULT_BUF_SIZE};
use fibrio_runtime::Runtime;

use crate::{
    opts::{set_cork, CorkState},
    IoDevice,
};

/// Full-duplex byte channel over one nonblocking descriptor.
///
/// Reads are prefetched through an internal window; writes are corked on
/// TCP sockets until [`flush`](Transceiver::flush). Any operation that
/// would block suspends the calling task until the reactor reports the
/// descriptor ready again, so the code around a transceiver stays straight
/// procedural.
///
/// A transceiver belongs to one task at a time. It unregisters itself from
/// the reactor when dropped; closing the descriptor stays the caller's
/// responsibility.
pub struct Transceiver<D: IoDevice> {
    // Declared first: the registration dies before the device can.
    client: SelectClient,
    device: D,
    reader: BufferedReader,
    cork: Cell<CorkState>,
}

impl<D: IoDevice> Transceiver<D> {
    /// Create a transceiver on the current runtime's reactor with the
    /// default prefetch capacity.
    ///
    /// # Panics
    ///
    /// Panics when called outside a runtime.
    pub fn new(device: D) -> Self {
        Self::with_capacity(DEFAULT_BUF_SIZE, device)
    }

    /// Create a transceiver on the current runtime's reactor with the given
    /// prefetch capacity.
    ///
    /// # Panics
    ///
    /// Panics when called outside a runtime.
    pub fn with_capacity(capacity: usize, device: D) -> Self {
        let reactor = Runtime::with_current(|rt| rt.reactor());
        Self::with_reactor(capacity, device, reactor)
    }

    /// Create a transceiver on an explicit reactor.
    pub fn with_reactor(capacity: usize, device: D, reactor: Rc<dyn Reactor>) -> Self {
        let client = SelectClient::new(reactor, device.as_raw_fd());
        Self {
            client,
            device,
            reader: BufferedReader::with_capacity(capacity),
            cork: Cell::new(CorkState::Unknown),
        }
    }

    /// The underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    pub(crate) fn select_client(&self) -> &SelectClient {
        &self.client
    }

    /// Current cork probe state.
    pub fn cork_state(&self) -> CorkState {
        self.cork.get()
    }

    /// Number of prefetched bytes waiting in the read window.
    pub fn prefetched(&self) -> usize {
        self.reader.buffer().len()
    }

    /// Whether the descriptor currently holds a reactor registration.
    pub fn is_registered(&self) -> bool {
        self.client.is_registered()
    }

    /// Fail any wait that sits idle longer than `timeout` with
    /// [`Error::Timeout`].
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.client.set_timeout(timeout);
    }

    /// Fill every byte of `dst`, or fail. An empty `dst` returns without
    /// touching the descriptor.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<()> {
        let Self {
            client,
            device,
            reader,
            ..
        } = self;
        let mut source = DeviceSource { device, client };
        reader.read_raw(&mut source, dst).await
    }

    /// Read a plain-old-data value byte by byte, unaligned.
    pub async fn read_value<T: Pod>(&mut self) -> Result<T> {
        let mut value = T::zeroed();
        self.read(bytemuck::bytes_of_mut(&mut value)).await?;
        Ok(value)
    }

    /// Hand buffered bytes to `consumer` until it reports itself satisfied;
    /// see [`BufferedReader::read_consume`].
    pub async fn read_consume<F>(&mut self, consumer: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> usize,
    {
        let Self {
            client,
            device,
            reader,
            ..
        } = self;
        let mut source = DeviceSource { device, client };
        reader.read_consume(&mut source, consumer).await
    }

    /// Write every byte of `src`, or fail.
    ///
    /// On TCP the bytes may sit in the cork buffer until
    /// [`flush`](Transceiver::flush). On failure there is no indication of
    /// how much of `src` was accepted; callers that need partial-progress
    /// accounting must subdivide.
    pub async fn write(&mut self, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        self.probe_cork();
        let mut written = 0;
        while written < src.len() {
            let n = transfer(&self.device, &self.client, Direction::Write, |d| {
                d.write(&src[written..])
            })
            .await?;
            written += n;
        }
        Ok(())
    }

    /// Write a plain-old-data value byte by byte.
    pub async fn write_value<T: Pod>(&mut self, value: &T) -> Result<()> {
        self.write(bytemuck::bytes_of(value)).await
    }

    /// Push corked bytes onto the wire, keeping the cork for subsequent
    /// writes. A no-op on devices without cork support.
    pub async fn flush(&mut self) -> Result<()> {
        if self.cork.get() == CorkState::Enabled {
            // Off and on again is the one portable way to force the kernel
            // to emit the pending segment without losing future batching.
            let fd = self.device.as_raw_fd();
            set_cork(fd, false).map_err(|e| Error::device("corking device", e))?;
            set_cork(fd, true).map_err(|e| Error::device("corking device", e))?;
        }
        Ok(())
    }

    /// Return the transceiver to its pristine state: prefetch gone, reactor
    /// registration gone, cork released and forgotten.
    ///
    /// Never fails; safe to call on a descriptor that is already broken.
    pub fn reset(&mut self) {
        self.reader.reset();
        self.client.unregister().ok();
        if self.cork.get() == CorkState::Enabled {
            set_cork(self.device.as_raw_fd(), false).ok();
        }
        self.cork.set(CorkState::Unknown);
    }

    /// One-time `TCP_CORK` probe, run lazily on the first write.
    fn probe_cork(&self) {
        if self.cork.get() == CorkState::Unknown {
            let state = match set_cork(self.device.as_raw_fd(), true) {
                Ok(()) => CorkState::Enabled,
                Err(_) => CorkState::Disabled,
            };
            self.cork.set(state);
        }
    }
}

enum Direction {
    Read,
    Write,
}

/// Run one device operation to completion, waiting out `WouldBlock` through
/// the select client and retrying `Interrupted` on the spot. Everything
/// else is fatal to the operation.
async fn transfer<D: IoDevice>(
    device: &D,
    client: &SelectClient,
    direction: Direction,
    mut operate: impl FnMut(&D) -> io::Result<usize>,
) -> Result<usize> {
    let (wanted, op) = match direction {
        Direction::Read => (Events::READABLE, "reading from device"),
        Direction::Write => (Events::WRITABLE, "writing to device"),
    };
    loop {
        match operate(device) {
            Ok(0) => {
                return match direction {
                    Direction::Read => Err(Error::EndOfFlow),
                    Direction::Write => unreachable!("write(2) accepted no bytes"),
                };
            }
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let events = client.io_wait(wanted).await?;
                check_events(device, events, wanted, op)?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(enrich(device, op, e)),
        }
    }
}

/// Classify a mask returned by `io_wait`: an error delivery or a hangup
/// with no readiness left is fatal; a hangup accompanied by the wanted
/// readiness lets buffered data drain first.
pub(crate) fn check_events<D: IoDevice>(
    device: &D,
    events: Events,
    wanted: Events,
    op: &'static str,
) -> Result<()> {
    if events.contains(Events::ERROR) {
        let source = device
            .take_error()
            .unwrap_or_else(|| io::Error::other("epoll reported I/O device error"));
        return Err(Error::Device { op, source });
    }
    if events.contains(Events::HANGUP) && !events.intersects(wanted) {
        return Err(Error::Hangup);
    }
    Ok(())
}

/// Swap a raw syscall failure for the more specific `SO_ERROR`, when the
/// socket has one pending.
pub(crate) fn enrich<D: IoDevice>(device: &D, op: &'static str, fallback: io::Error) -> Error {
    Error::Device {
        op,
        source: device.take_error().unwrap_or(fallback),
    }
}

/// Borrow of the transceiver's device and client, shaped as the refill
/// source the buffered reader consumes.
struct DeviceSource<'a, D> {
    device: &'a D,
    client: &'a SelectClient,
}

impl<D: IoDevice> RawRead for DeviceSource<'_, D> {
    async fn read_once(&mut self, dst: &mut [u8]) -> Result<usize> {
        transfer(self.device, self.client, Direction::Read, |d| d.read(dst)).await
    }

    async fn read_scatter(&mut self, head: &mut [u8], tail: &mut [u8]) -> Result<usize> {
        transfer(self.device, self.client, Direction::Read, |d| {
            d.read_vectored(head, tail)
        })
        .await
    }
}
