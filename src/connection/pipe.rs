//! Flow-controlled byte pipe.
//!
//! One side writes segments, the other reads and then advances past what it
//! consumed. Bytes count as outstanding until advanced. A write that leaves
//! the pipe at or above the pause threshold does not return until the reader
//! brings it back below the resume threshold.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Buf, Bytes};
use thiserror::Error;
use tokio::sync::Notify;

/// Why a pipe (and usually its whole connection) was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The peer reset the connection.
    ConnectionReset,
    /// The application or the server aborted the connection.
    Aborted,
    /// A timeout fired.
    TimedOut,
    /// The peer violated the protocol.
    ProtocolError,
    /// The server is shutting down.
    ServerShutdown,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortReason::ConnectionReset => "connection reset by peer",
            AbortReason::Aborted => "connection aborted",
            AbortReason::TimedOut => "connection timed out",
            AbortReason::ProtocolError => "protocol error",
            AbortReason::ServerShutdown => "server shutting down",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PipeError {
    #[error("pipe aborted: {0}")]
    Aborted(AbortReason),
    #[error("pipe reader has completed")]
    ReaderCompleted,
    #[error("pipe writer has completed")]
    WriterCompleted,
}

/// Watermarks for one pipe. A pause threshold of zero disables backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    pub pause_writer_threshold: usize,
    pub resume_writer_threshold: usize,
}

impl PipeOptions {
    pub fn new(pause_writer_threshold: usize, resume_writer_threshold: usize) -> Self {
        Self {
            pause_writer_threshold,
            resume_writer_threshold: resume_writer_threshold.min(pause_writer_threshold),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            pause_writer_threshold: 0,
            resume_writer_threshold: 0,
        }
    }
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self::new(64 * 1024, 32 * 1024)
    }
}

/// Result of a [`PipeReader::read`].
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// The next unconsumed segment. Empty only when `is_completed`.
    pub buffer: Bytes,
    /// The writer completed and `buffer` is the last data there will be.
    pub is_completed: bool,
}

#[derive(Debug, Default)]
struct State {
    segments: VecDeque<Bytes>,
    outstanding: usize,
    writer_completed: bool,
    reader_completed: bool,
    aborted: Option<AbortReason>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    options: PipeOptions,
    readable: Notify,
    writable: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("pipe state mutex poisoned")
    }

    fn abort(&self, reason: AbortReason) {
        {
            let mut state = self.lock();
            if state.aborted.is_none() {
                state.aborted = Some(reason);
            }
            state.segments.clear();
            state.outstanding = 0;
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

/// Create a connected writer/reader pair.
pub fn pipe(options: PipeOptions) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
        options,
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// Producer half of a pipe.
#[derive(Debug, Clone)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Append `data`, then wait while the pipe is over its pause threshold.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), PipeError> {
        let data = data.into();
        let must_wait = {
            let mut state = self.shared.lock();
            if let Some(reason) = state.aborted {
                return Err(PipeError::Aborted(reason));
            }
            if state.reader_completed {
                return Err(PipeError::ReaderCompleted);
            }
            if state.writer_completed {
                return Err(PipeError::WriterCompleted);
            }
            if !data.is_empty() {
                state.outstanding += data.len();
                state.segments.push_back(data);
            }
            let pause = self.shared.options.pause_writer_threshold;
            pause > 0 && state.outstanding >= pause
        };
        self.shared.readable.notify_waiters();

        if must_wait {
            self.wait_for_resume().await?;
        }
        Ok(())
    }

    async fn wait_for_resume(&self) -> Result<(), PipeError> {
        loop {
            let notified = self.shared.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.lock();
                if let Some(reason) = state.aborted {
                    return Err(PipeError::Aborted(reason));
                }
                if state.reader_completed {
                    return Err(PipeError::ReaderCompleted);
                }
                if state.outstanding < self.shared.options.resume_writer_threshold.max(1) {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Signal that no more data will be written.
    pub fn complete(&self) {
        self.shared.lock().writer_completed = true;
        self.shared.readable.notify_waiters();
    }

    /// Abort the pipe; pending and future operations on both halves fail.
    pub fn abort(&self, reason: AbortReason) {
        self.shared.abort(reason);
    }

    /// Resolves once the reader has completed or the pipe was aborted.
    pub async fn reader_closed(&self) {
        loop {
            let notified = self.shared.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.lock();
                if state.reader_completed || state.aborted.is_some() {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Bytes written but not yet advanced past by the reader.
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().writer_completed
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.shared.lock().aborted
    }
}

/// Consumer half of a pipe.
#[derive(Debug, Clone)]
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Wait for the next segment or writer completion.
    pub async fn read(&self) -> Result<ReadResult, PipeError> {
        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.lock();
                if let Some(reason) = state.aborted {
                    return Err(PipeError::Aborted(reason));
                }
                if state.reader_completed {
                    return Err(PipeError::ReaderCompleted);
                }
                if let Some(front) = state.segments.front() {
                    return Ok(ReadResult {
                        buffer: front.clone(),
                        is_completed: state.writer_completed && state.segments.len() == 1,
                    });
                }
                if state.writer_completed {
                    return Ok(ReadResult {
                        buffer: Bytes::new(),
                        is_completed: true,
                    });
                }
            }
            notified.await;
        }
    }

    /// Mark `consumed` bytes as processed, waking a paused writer once the
    /// pipe drops below the resume threshold.
    pub fn advance(&self, consumed: usize) {
        let wake = {
            let mut state = self.shared.lock();
            let mut remaining = consumed.min(state.outstanding);
            state.outstanding -= remaining;
            while remaining > 0 {
                let Some(front) = state.segments.front_mut() else {
                    break;
                };
                if front.len() <= remaining {
                    remaining -= front.len();
                    state.segments.pop_front();
                } else {
                    front.advance(remaining);
                    remaining = 0;
                }
            }
            state.outstanding < self.shared.options.resume_writer_threshold.max(1)
        };
        if wake {
            self.shared.writable.notify_waiters();
        }
    }

    /// Signal that no more data will be consumed. Buffered data is discarded.
    pub fn complete(&self) {
        {
            let mut state = self.shared.lock();
            state.reader_completed = true;
            state.segments.clear();
            state.outstanding = 0;
        }
        self.shared.writable.notify_waiters();
        self.shared.readable.notify_waiters();
    }

    pub fn abort(&self, reason: AbortReason) {
        self.shared.abort(reason);
    }

    /// Bytes written but not yet advanced past (test harness accessor).
    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().reader_completed
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.shared.lock().aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn read_advance_in_order() {
        let (writer, reader) = pipe(PipeOptions::unbounded());
        writer.write(Bytes::from_static(b"hello ")).await.unwrap();
        writer.write(Bytes::from_static(b"world")).await.unwrap();
        writer.complete();

        let first = reader.read().await.unwrap();
        assert_eq!(&first.buffer[..], b"hello ");
        assert!(!first.is_completed);
        reader.advance(3);

        let partial = reader.read().await.unwrap();
        assert_eq!(&partial.buffer[..], b"lo ");
        reader.advance(partial.buffer.len());

        let last = reader.read().await.unwrap();
        assert_eq!(&last.buffer[..], b"world");
        assert!(last.is_completed);
        reader.advance(5);

        let end = reader.read().await.unwrap();
        assert!(end.buffer.is_empty());
        assert!(end.is_completed);
    }

    #[tokio::test]
    async fn write_blocks_until_below_resume_threshold() {
        let (writer, reader) = pipe(PipeOptions::new(8, 4));

        let w = writer.clone();
        let task = tokio::spawn(async move { w.write(vec![7u8; 10]).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        let r = reader.read().await.unwrap();
        assert_eq!(r.buffer.len(), 10);
        reader.advance(6);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished(), "4 outstanding is not below the resume threshold");

        reader.advance(1);
        task.await.unwrap().unwrap();
        assert_eq!(writer.outstanding(), 3);
    }

    #[tokio::test]
    async fn no_bytes_dropped_or_duplicated_under_backpressure() {
        let (writer, reader) = pipe(PipeOptions::new(64, 16));

        let producer = tokio::spawn(async move {
            let mut sent = Vec::new();
            for i in 0..500u32 {
                let chunk: Vec<u8> = (0..(i % 37 + 1)).map(|j| (i + j) as u8).collect();
                sent.extend_from_slice(&chunk);
                writer.write(chunk).await.unwrap();
            }
            writer.complete();
            sent
        });

        let mut received = Vec::new();
        loop {
            let result = reader.read().await.unwrap();
            // Consume in small steps to exercise partial advances.
            let take = result.buffer.len().min(5);
            received.extend_from_slice(&result.buffer[..take]);
            reader.advance(take);
            if result.is_completed && take == result.buffer.len() {
                break;
            }
        }

        let sent = producer.await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn abort_fails_pending_read_and_write() {
        let (writer, reader) = pipe(PipeOptions::new(4, 2));

        let w = writer.clone();
        let pending_write = tokio::spawn(async move { w.write(vec![0u8; 8]).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        reader.abort(AbortReason::Aborted);
        assert_eq!(
            pending_write.await.unwrap(),
            Err(PipeError::Aborted(AbortReason::Aborted))
        );
        assert_eq!(
            reader.read().await.unwrap_err(),
            PipeError::Aborted(AbortReason::Aborted)
        );
        assert!(writer.write(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn reader_completion_releases_writer() {
        let (writer, reader) = pipe(PipeOptions::new(4, 2));
        let w = writer.clone();
        let task = tokio::spawn(async move { w.write(vec![1u8; 4]).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        reader.complete();
        assert_eq!(task.await.unwrap(), Err(PipeError::ReaderCompleted));
        writer.reader_closed().await;
    }
}
