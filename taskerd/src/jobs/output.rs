/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Fan-out buffer for a job's combined stdout/stderr.
//!
//! One writer appends; any number of readers independently consume the full
//! history and then follow the live tail. Readers created after the buffer
//! closes still replay everything that was written.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, OutputError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutputError {
    #[error("output buffer is closed")]
    Closed,
    #[error("read cancelled")]
    Cancelled,
}

/// An append-only byte buffer that notifies readers on change.
#[derive(Debug)]
pub struct OutputBuffer {
    state: Mutex<BufferState>,
    // Bumped on every write and on close, while the state lock is held, so
    // readers can capture the current generation before releasing the lock.
    generation: watch::Sender<u64>,
}

#[derive(Debug, Default)]
struct BufferState {
    buf: Vec<u8>,
    closed: bool,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBuffer {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { state: Mutex::new(BufferState::default()), generation }
    }

    /// Appends data to the buffer and wakes all waiting readers.
    ///
    /// Writing zero bytes is a no-op and wakes nobody.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock().expect("output buffer lock");

        if state.closed {
            return Err(OutputError::Closed);
        }

        state.buf.extend_from_slice(data);
        self.generation.send_modify(|generation| *generation += 1);

        Ok(data.len())
    }

    /// Marks the buffer as closed and wakes all waiting readers. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("output buffer lock");

        if state.closed {
            return;
        }

        state.closed = true;
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Returns a reader positioned at the beginning of the buffer.
    ///
    /// Readers hold a reference-counted handle so they can outlive the
    /// request handler that created them.
    pub fn reader(self: &Arc<Self>, cancel: CancellationToken) -> OutputReader {
        OutputReader {
            buffer: Arc::clone(self),
            offset: 0,
            generation: self.generation.subscribe(),
            cancel,
        }
    }
}

/// A reader that consumes an [OutputBuffer] from the beginning.
///
/// Each reader advances independently; none can block another.
#[derive(Debug)]
pub struct OutputReader {
    buffer: Arc<OutputBuffer>,
    offset: usize,
    generation: watch::Receiver<u64>,
    cancel: CancellationToken,
}

impl OutputReader {
    /// Copies buffered bytes into `buf`, blocking until new data arrives,
    /// the buffer closes, or the reader is cancelled.
    ///
    /// Returns `Ok(0)` for end-of-stream once the buffer is closed and
    /// fully drained. A zero-length `buf` returns `Ok(0)` without blocking.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            {
                let state =
                    self.buffer.state.lock().expect("output buffer lock");

                // new data
                if self.offset < state.buf.len() {
                    let count = (state.buf.len() - self.offset).min(buf.len());
                    buf[..count].copy_from_slice(
                        &state.buf[self.offset..self.offset + count],
                    );
                    self.offset += count;

                    return Ok(count);
                }

                // end of stream
                if state.closed {
                    return Ok(0);
                }

                // Mark the current generation as seen while the buffer lock
                // is still held. A write between the unlock below and the
                // await is then observable through `changed`, so no wakeup
                // can be lost.
                let _ = self.generation.borrow_and_update();
            }

            tokio::select! {
                changed = self.generation.changed() => {
                    // The sender lives inside the buffer this reader holds,
                    // so it cannot have been dropped.
                    let _ = changed;
                }
                () = self.cancel.cancelled() => {
                    return Err(OutputError::Cancelled);
                }
            }
        }
    }

    /// Reads until end-of-stream and returns everything from offset zero.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            match self.read(&mut chunk).await? {
                0 => return Ok(out),
                count => out.extend_from_slice(&chunk[..count]),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_write_single() {
        let buffer = OutputBuffer::new();
        let count = buffer.write(b"hello world").expect("write");
        assert_eq!(count, 11);
        assert_eq!(buffer.state.lock().expect("lock").buf, b"hello world");
    }

    #[test]
    fn test_write_multiple() {
        let buffer = OutputBuffer::new();
        let _ = buffer.write(b"one").expect("write");
        let _ = buffer.write(b"two").expect("write");
        let _ = buffer.write(b"three").expect("write");
        assert_eq!(buffer.state.lock().expect("lock").buf, b"onetwothree");
    }

    #[test]
    fn test_write_empty_is_noop() {
        let buffer = OutputBuffer::new();
        let generation = *buffer.generation.subscribe().borrow();

        assert_eq!(buffer.write(b"").expect("write"), 0);
        assert!(buffer.state.lock().expect("lock").buf.is_empty());
        // no notification was published
        assert_eq!(*buffer.generation.subscribe().borrow(), generation);
    }

    #[test]
    fn test_write_after_close() {
        let buffer = OutputBuffer::new();
        buffer.close();
        assert_eq!(buffer.write(b"hello"), Err(OutputError::Closed));
    }

    #[test]
    fn test_close_idempotent() {
        let buffer = OutputBuffer::new();
        buffer.close();
        buffer.close();
    }

    #[tokio::test]
    async fn test_read_blocks_until_write() {
        let buffer = std::sync::Arc::new(OutputBuffer::new());

        let read = tokio::spawn({
            let buffer = std::sync::Arc::clone(&buffer);
            async move {
                let mut reader = buffer.reader(CancellationToken::new());
                let mut buf = [0u8; 16];
                let count = reader.read(&mut buf).await.expect("read");
                buf[..count].to_vec()
            }
        });

        // Reader should be blocked since there is no data yet
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!read.is_finished());

        let _ = buffer.write(b"hello world").expect("write");

        let got = tokio::time::timeout(Duration::from_secs(1), read)
            .await
            .expect("read did not unblock after write")
            .expect("join");
        assert_eq!(got, b"hello world");
    }

    #[tokio::test]
    async fn test_read_eof_on_closed_empty_buffer() {
        let buffer = std::sync::Arc::new(OutputBuffer::new());
        buffer.close();

        let mut reader = buffer.reader(CancellationToken::new());
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).await, Ok(0));
    }

    #[tokio::test]
    async fn test_read_drains_before_eof() {
        let buffer = std::sync::Arc::new(OutputBuffer::new());
        let _ = buffer.write(b"hello world").expect("write");
        buffer.close();

        let mut reader = buffer.reader(CancellationToken::new());

        let mut chunk = [0u8; 4];
        let count = reader.read(&mut chunk).await.expect("read");
        assert_eq!(&chunk[..count], b"hell");

        let rest = reader.read_to_end().await.expect("read_to_end");
        assert_eq!(rest, b"o world");
    }

    #[tokio::test]
    async fn test_reader_created_after_close_sees_history() {
        let buffer = std::sync::Arc::new(OutputBuffer::new());
        let _ = buffer.write(b"one\n").expect("write");
        let _ = buffer.write(b"two\n").expect("write");
        buffer.close();

        let mut reader = buffer.reader(CancellationToken::new());
        assert_eq!(
            reader.read_to_end().await.expect("read_to_end"),
            b"one\ntwo\n"
        );
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_identical_bytes() {
        let buffer = std::sync::Arc::new(OutputBuffer::new());

        let early = tokio::spawn({
            let buffer = std::sync::Arc::clone(&buffer);
            async move {
                let mut reader = buffer.reader(CancellationToken::new());
                reader.read_to_end().await.expect("read_to_end")
            }
        });

        let _ = buffer.write(b"alpha ").expect("write");
        let _ = buffer.write(b"beta ").expect("write");
        let _ = buffer.write(b"gamma").expect("write");
        buffer.close();

        let late = buffer
            .reader(CancellationToken::new())
            .read_to_end()
            .await
            .expect("read_to_end");

        let early = early.await.expect("join");
        assert_eq!(early, late);
        assert_eq!(late, b"alpha beta gamma");
    }

    #[tokio::test]
    async fn test_read_zero_length_buffer() {
        let buffer = std::sync::Arc::new(OutputBuffer::new());
        let _ = buffer.write(b"hello world").expect("write");

        let mut reader = buffer.reader(CancellationToken::new());
        assert_eq!(reader.read(&mut []).await, Ok(0));
    }

    #[tokio::test]
    async fn test_read_cancelled_before() {
        let buffer = std::sync::Arc::new(OutputBuffer::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut reader = buffer.reader(cancel);
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).await, Err(OutputError::Cancelled));
    }

    #[tokio::test]
    async fn test_read_cancelled_during() {
        let buffer = std::sync::Arc::new(OutputBuffer::new());
        let cancel = CancellationToken::new();

        let read = tokio::spawn({
            let buffer = std::sync::Arc::clone(&buffer);
            let cancel = cancel.clone();
            async move {
                let mut reader = buffer.reader(cancel);
                let mut buf = [0u8; 16];
                reader.read(&mut buf).await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), read)
            .await
            .expect("read did not unblock after cancellation")
            .expect("join");
        assert_eq!(result, Err(OutputError::Cancelled));
    }
}
