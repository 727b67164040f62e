use crate::lines::LineSplitter;
use crate::process::BoxedOutput;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const OUTPUT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Output reader over the parent end of a child's merged stdout/stderr pipe
pub type OutputStream = OutputReader<BoxedOutput>;

/// Buffered reader that hands out raw bytes or lines.
///
/// Line state lives here rather than in the read futures, so dropping a
/// pending read (cancellation) never loses bytes that were already pulled off
/// the pipe.
pub struct OutputReader<R> {
    reader: BufReader<R>,
    splitter: LineSplitter,
}

impl<R: AsyncRead + Unpin + Send> OutputReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(OUTPUT_BUFFER_CAPACITY, inner)
    }

    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, inner),
            splitter: LineSplitter::new(),
        }
    }

    /// Read up to `buf.len()` raw bytes. `Ok(0)` means end of stream.
    ///
    /// Bytes already scanned by an interrupted line read are returned first.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.splitter.reset_break_state();
        let pending = self.splitter.drain_partial(buf);
        if pending > 0 {
            return Ok(pending);
        }

        self.reader.read(buf).await
    }

    /// Next line, or `None` at end of stream. Cancel safe.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let data = self.reader.fill_buf().await?;
            if data.is_empty() {
                return Ok(self.splitter.finish());
            }

            let (consumed, line) = self.splitter.next_line(data);
            self.reader.consume(consumed);
            if line.is_some() {
                return Ok(line);
            }
        }
    }

    /// Drain the stream to completion.
    ///
    /// Not cancel safe: lines collected before cancellation are dropped.
    pub async fn read_all_lines(&mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let data = self.reader.fill_buf().await?;
            if data.is_empty() {
                break;
            }

            let len = data.len();
            self.splitter.push(data, &mut lines);
            self.reader.consume(len);
        }

        lines.extend(self.splitter.finish());
        Ok(lines)
    }

    /// Next line, or `None` when the stream ended or `cancel` fired.
    ///
    /// Cancellation is checked first, so an already-cancelled token returns
    /// `None` even when output is waiting. Read errors also end the stream.
    pub async fn try_read_line(&mut self, cancel: &CancellationToken) -> Option<String> {
        if cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            line = self.read_line() => match line {
                Ok(line) => line,
                Err(e) => {
                    debug!(error = %e, "Output read failed, treating as end of stream");
                    None
                }
            },
        }
    }
}
