//! Lazy row streaming.
//!
//! Rust has no generator construct, so a streamed execute runs its
//! connection-owning scope on a dedicated producer thread bridged to the
//! consumer by a rendezvous channel. The zero-capacity channel means the
//! producer cannot advance past handing off one row until the consumer asks
//! for the next, which gives generator pacing: fetching row N+1 from the
//! driver happens only on demand.
//!
//! Dropping the stream mid-iteration disconnects the channel; the producer
//! observes the disconnect at its next hand-off and runs the same scoped
//! connection release as on normal exhaustion.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use crate::error::Error;

/// Producer-side handle used by an adapter to hand rows to the consumer.
pub(crate) struct RowSink<T> {
    tx: SyncSender<Result<T, Error>>,
}

impl<T> RowSink<T> {
    /// Hand one row to the consumer, blocking until it is taken.
    ///
    /// Returns `false` when the consumer abandoned the stream; the producer
    /// must stop iterating and release its connection.
    pub(crate) fn emit(&self, row: T) -> bool {
        self.tx.send(Ok(row)).is_ok()
    }

    /// Deliver a failure as the next (and final) item of the sequence.
    /// Ignored when the consumer is already gone.
    pub(crate) fn fail(&self, err: Error) {
        let _ = self.tx.send(Err(err));
    }
}

/// A lazy, forward-only, single-pass sequence of rows.
///
/// The producing scope holds the underlying connection open for exactly as
/// long as the stream is being consumed. Once the sequence is exhausted —
/// or the stream is dropped early — the connection is closed and the
/// producer thread ends. A `RowStream` cannot be restarted: after the final
/// item, every further call to `next` returns `None`.
pub struct RowStream<T> {
    rx: Option<Receiver<Result<T, Error>>>,
    producer: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> RowStream<T> {
    /// Spawn the producing scope and return the consumer half.
    ///
    /// The producer runs until it has emitted every row, hit a failure, or
    /// observed that the consumer went away.
    pub(crate) fn spawn<F>(producer: F) -> Self
    where
        F: FnOnce(RowSink<T>) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(0);
        let handle = thread::spawn(move || producer(RowSink { tx }));
        Self {
            rx: Some(rx),
            producer: Some(handle),
        }
    }
}

impl<T> RowStream<T> {
    fn join_producer(&mut self) {
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                tracing::warn!("row stream producer panicked");
            }
        }
    }
}

impl<T> Iterator for RowStream<T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let rx = self.rx.as_ref()?;
        match rx.recv() {
            Ok(item) => Some(item),
            Err(_) => {
                // Producer finished and dropped its sender.
                self.rx = None;
                self.join_producer();
                None
            }
        }
    }
}

impl<T> Drop for RowStream<T> {
    fn drop(&mut self) {
        // Disconnect first so a producer blocked on a hand-off wakes up.
        self.rx = None;
        self.join_producer();
    }
}
