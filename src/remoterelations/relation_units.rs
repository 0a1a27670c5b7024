use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::params::RelationStatusChange;
use crate::params::RelationUnitsChange;
use crate::watcher::Watcher;
use crate::worker::until_cancelled;
use crate::Error;
use crate::Result;

/// A watch batch tagged with the relation it belongs to and the
/// registration that started its watcher.
#[derive(Debug)]
pub(crate) struct RelationChange<C> {
    pub(crate) relation_key: String,
    pub(crate) registration: String,
    pub(crate) change: C,
}

/// Leaf worker relaying one relation's watch stream to the owning
/// application worker.
pub(crate) struct RelationWatchWorker<C> {
    relation_key: String,
    registration: String,
    watcher: Watcher<C>,
    changes: mpsc::Sender<RelationChange<C>>,
}

/// Unit membership and settings changes for one side of a relation.
pub(crate) type RelationUnitsWorker = RelationWatchWorker<RelationUnitsChange>;

/// Life and suspension changes of a relation as seen by the offering model.
pub(crate) type RelationStatusWorker = RelationWatchWorker<Vec<RelationStatusChange>>;

impl<C> RelationWatchWorker<C>
where
    C: std::fmt::Debug + Send + 'static,
{
    pub(crate) fn new(
        relation_key: impl Into<String>,
        registration: impl Into<String>,
        watcher: Watcher<C>,
        changes: mpsc::Sender<RelationChange<C>>,
    ) -> Self {
        Self {
            relation_key: relation_key.into(),
            registration: registration.into(),
            watcher,
            changes,
        }
    }

    pub(crate) async fn run(
        mut self,
        token: CancellationToken,
    ) -> Result<()> {
        let result = self.forward(&token).await;
        self.watcher.kill();
        result
    }

    async fn forward(
        &mut self,
        token: &CancellationToken,
    ) -> Result<()> {
        loop {
            let change = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Exit),
                change = self.watcher.next() => change,
            };
            let Some(change) = change else {
                return self.watcher.finish();
            };

            trace!(
                "{} watcher for relation {}: {:?}",
                self.watcher.name(),
                self.relation_key,
                change
            );
            let event = RelationChange {
                relation_key: self.relation_key.clone(),
                registration: self.registration.clone(),
                change,
            };
            let changes = &self.changes;
            until_cancelled(token, async move { changes.send(event).await.map_err(|_| Error::Exit) })
                .await?;
        }
    }
}
