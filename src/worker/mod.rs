//! Worker lifecycle glue shared by every level of the worker tree.
//!
//! A parent spawns each child with [`spawn_worker`], handing it a child
//! cancellation token and the sending side of its failure channel. The
//! parent keeps the returned [`WorkerHandle`] in its registry; killing the
//! parent's token cancels the whole sub-tree, and the parent waits for every
//! handle before it reports itself stopped.


use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::instrument::WithSubscriber;
use tracing::warn;
use tracing::Instrument;

use crate::Error;
use crate::Result;

/// A child that stopped with anything other than a voluntary exit.
#[derive(Debug)]
pub struct ChildFailure {
    /// Instance id of the failed worker, see [`WorkerHandle::id`].
    pub id: String,
    pub name: String,
    pub error: Error,
}

pub type FailureSender = mpsc::UnboundedSender<ChildFailure>;
pub type FailureReceiver = mpsc::UnboundedReceiver<ChildFailure>;

pub fn failure_channel() -> (FailureSender, FailureReceiver) {
    mpsc::unbounded_channel()
}

/// Ownership record for one spawned worker.
pub struct WorkerHandle {
    id: String,
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Unique per spawned instance; a respawned worker gets a new id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kill(&self) {
        self.token.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker task to end. The worker's own error, if any,
    /// has already been delivered on the failure channel.
    pub async fn wait(self) -> Result<()> {
        self.handle.await.map_err(Error::from)
    }

    pub async fn stop(self) -> Result<()> {
        self.kill();
        self.wait().await
    }
}

/// Spawns `task_fn` as a child of `parent`.
///
/// The task runs in the current span and with the current subscriber, so
/// the parent's logging capability carries over. Any error other than
/// [`Error::Exit`], including a panic, is reported on `failures`.
pub fn spawn_worker<F, Fut>(
    name: impl Into<String>,
    parent: &CancellationToken,
    failures: FailureSender,
    task_fn: F,
) -> WorkerHandle
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.into();
    let id = nanoid::nanoid!(10);
    let token = parent.child_token();
    let task = task_fn(token.clone());

    let task_name = name.clone();
    let task_id = id.clone();
    let handle = tokio::spawn(
        async move {
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(Error::Fatal(format!("worker {task_name} panicked"))),
            };
            match result {
                Ok(()) | Err(Error::Exit) => {
                    debug!("worker {} stopped", task_name);
                }
                Err(error) => {
                    warn!("worker {} failed: {}", task_name, error);
                    let _ = failures.send(ChildFailure {
                        id: task_id,
                        name: task_name,
                        error,
                    });
                }
            }
        }
        .in_current_span()
        .with_current_subscriber(),
    );

    WorkerHandle {
        id,
        name,
        token,
        handle,
    }
}

/// Kills every handle, then waits for all of them.
pub async fn stop_all(handles: impl IntoIterator<Item = WorkerHandle>) {
    let handles: Vec<WorkerHandle> = handles.into_iter().collect();
    for handle in &handles {
        handle.kill();
    }
    for handle in handles {
        let name = handle.name().to_string();
        if let Err(e) = handle.wait().await {
            warn!("waiting for worker {} to stop: {:?}", name, e);
        }
    }
}

/// Races `fut` against `token`, returning `Exit` if the token fires first.
pub async fn until_cancelled<T, Fut>(
    token: &CancellationToken,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Exit),
        result = fut => result,
    }
}
