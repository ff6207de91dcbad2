use fibrio_driver::Result;

use crate::{ReadBuffer, DEFAULT_BUF_SIZE};

/// Readiness-blocking read delegates consumed by [`BufferedReader`].
///
/// Both operations suspend the calling task until at least one byte arrives
/// or an error surfaces; neither ever resolves to `Ok(0)`.
#[allow(async_fn_in_trait)]
pub trait RawRead {
    /// Read into one contiguous destination.
    async fn read_once(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// One scatter read filling `head` to exhaustion before spilling into
    /// `tail`, so a single syscall can complete a caller request and refill
    /// the prefetch window at the same time.
    async fn read_scatter(&mut self, head: &mut [u8], tail: &mut [u8]) -> Result<usize>;
}

impl<R: RawRead + ?Sized> RawRead for &mut R {
    async fn read_once(&mut self, dst: &mut [u8]) -> Result<usize> {
        (**self).read_once(dst).await
    }

    async fn read_scatter(&mut self, head: &mut [u8], tail: &mut [u8]) -> Result<usize> {
        (**self).read_scatter(head, tail).await
    }
}

/// Prefetching reader assembling exact-length requests over a [`RawRead`].
///
/// Small requests are served out of the window; a request larger than what
/// is buffered drains the window first and then scatter-reads straight into
/// the caller's buffer, letting the overflow repopulate the window as
/// prefetch. The window never grows after construction.
#[derive(Debug)]
pub struct BufferedReader {
    buffer: ReadBuffer,
}

impl BufferedReader {
    /// Create a reader with [`DEFAULT_BUF_SIZE`] of prefetch.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUF_SIZE)
    }

    /// Create a reader with the given prefetch capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: ReadBuffer::with_capacity(capacity),
        }
    }

    /// The prefetch window.
    pub fn buffer(&self) -> &ReadBuffer {
        &self.buffer
    }

    /// Forget all prefetched bytes.
    pub fn reset(&mut self) {
        self.buffer.reset();
    }

    /// Fill every byte of `dst`, or fail. An empty `dst` returns without
    /// touching the source.
    pub async fn read_raw<S: RawRead>(&mut self, src: &mut S, dst: &mut [u8]) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }

        let buffered = self.buffer.len();
        if buffered >= dst.len() {
            dst.copy_from_slice(&self.buffer.pending()[..dst.len()]);
            self.buffer.advance(dst.len());
            return Ok(());
        }

        dst[..buffered].copy_from_slice(self.buffer.pending());
        self.buffer.advance(buffered);

        // The window is drained, so its cursors are back at 0 and every
        // scatter below may refill the whole capacity.
        let mut filled = buffered;
        while filled < dst.len() {
            let wanted = dst.len() - filled;
            let n = src
                .read_scatter(&mut dst[filled..], self.buffer.unfilled())
                .await?;
            if n > wanted {
                self.buffer.filled(n - wanted);
                filled = dst.len();
            } else {
                filled += n;
            }
        }
        Ok(())
    }

    /// Hand the buffered bytes to `consumer`, refilling first when the
    /// window is empty.
    ///
    /// The consumer returns how many of the presented bytes it consumed;
    /// any value greater than the slice length (such as `usize::MAX`) means
    /// "all of them, and I need more", which consumes the slice and loops
    /// with a fresh refill.
    pub async fn read_consume<S, F>(&mut self, src: &mut S, mut consumer: F) -> Result<()>
    where
        S: RawRead,
        F: FnMut(&[u8]) -> usize,
    {
        loop {
            if self.buffer.is_empty() {
                let n = src.read_once(self.buffer.unfilled()).await?;
                debug_assert!(n > 0);
                self.buffer.filled(n);
            }

            let shown = self.buffer.len();
            let n = consumer(self.buffer.pending());
            if n <= shown {
                self.buffer.advance(n);
                return Ok(());
            }
            self.buffer.advance(shown);
        }
    }
}

impl Default for BufferedReader {
    fn default() -> Self {
        Self::new()
    }
}
