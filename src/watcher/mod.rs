//! Watch streams handed out by the relations facades.
//!
//! A facade implementation creates a pair with [`channel`]: it keeps the
//! [`WatcherSink`] and feeds change batches into it, while the consuming
//! worker owns the [`Watcher`]. Killing the watcher is observed by the sink,
//! so producers can release whatever backs the stream; a producer that
//! fails records its error with [`WatcherSink::fail`], which the consumer
//! picks up once the stream drains.


use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Error;
use crate::Result;
use crate::WatcherError;

struct Shared {
    name: String,
    killed: CancellationToken,
    error: Mutex<Option<Error>>,
}

/// Creates a watch stream buffering up to `capacity` batches.
pub fn channel<C>(
    name: impl Into<String>,
    capacity: usize,
) -> (WatcherSink<C>, Watcher<C>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        name: name.into(),
        killed: CancellationToken::new(),
        error: Mutex::new(None),
    });
    (
        WatcherSink {
            tx,
            shared: shared.clone(),
        },
        Watcher { changes: rx, shared },
    )
}

/// Consuming end of a watch stream.
pub struct Watcher<C> {
    changes: mpsc::Receiver<C>,
    shared: Arc<Shared>,
}

impl<C> Watcher<C> {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Next change batch. Returns `None` once the watcher is killed or the
    /// producer has gone away; cancel-safe.
    pub async fn next(&mut self) -> Option<C> {
        tokio::select! {
            biased;
            _ = self.shared.killed.cancelled() => None,
            change = self.changes.recv() => change,
        }
    }

    pub fn kill(&self) {
        self.shared.killed.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.shared.killed.is_cancelled()
    }

    /// Outcome of a stream that stopped delivering batches: the producer's
    /// recorded error, `Exit` if the watcher was killed, or
    /// `WatcherError::Closed` when the producer vanished without a reason.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(err) = self.shared.error.lock().take() {
            return Err(err);
        }
        if self.is_killed() {
            return Err(Error::Exit);
        }
        Err(WatcherError::Closed {
            name: self.shared.name.clone(),
        }
        .into())
    }
}

impl<C> Drop for Watcher<C> {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Producing end of a watch stream, kept by the facade.
pub struct WatcherSink<C> {
    tx: mpsc::Sender<C>,
    shared: Arc<Shared>,
}

impl<C> Clone for WatcherSink<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<C> WatcherSink<C> {
    /// Delivers a batch, waiting for buffer space. Fails with `Exit` once
    /// the consumer has killed or dropped the watcher.
    pub async fn send(
        &self,
        change: C,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.shared.killed.cancelled() => Err(Error::Exit),
            sent = self.tx.send(change) => sent.map_err(|_| Error::Exit),
        }
    }

    pub fn is_killed(&self) -> bool {
        self.shared.killed.is_cancelled()
    }

    /// Resolves when the consumer kills the watcher.
    pub async fn killed(&self) {
        self.shared.killed.cancelled().await
    }

    /// Ends the stream with an error once every clone of this sink is gone.
    /// Batches already buffered are still delivered before the consumer
    /// sees the failure.
    pub fn fail(
        self,
        err: Error,
    ) {
        *self.shared.error.lock() = Some(err);
    }
}
