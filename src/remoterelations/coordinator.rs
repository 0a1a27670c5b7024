//! Top-level worker that keeps one [`RemoteApplicationWorker`] per remote
//! application consumed by the local model.
//!
//! ## Example
//! ```ignore
//! let worker = RemoteRelationsBuilder::new()
//!     .model_uuid("local-model-uuid")
//!     .relations_facade(local_facade)
//!     .new_remote_facade(Arc::new(|info: &ApiInfo| connect(info)))
//!     .start()?;
//!
//! worker.stop().await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::info_span;
use tracing::instrument::WithSubscriber;
use tracing::warn;
use tracing::Dispatch;
use tracing::Instrument;

use super::application_worker::RemoteApplicationWorker;
use crate::config::RemoteRelationsConfig;
use crate::config::WatcherConfig;
use crate::facade::LocalRelationsFacade;
use crate::facade::NewRemoteFacadeFn;
use crate::params::Life;
use crate::params::RemoteApplication;
use crate::worker::failure_channel;
use crate::worker::spawn_worker;
use crate::worker::stop_all;
use crate::worker::until_cancelled;
use crate::worker::ChildFailure;
use crate::worker::FailureReceiver;
use crate::worker::FailureSender;
use crate::worker::WorkerHandle;
use crate::Error;
use crate::FacadeError;
use crate::Result;

/// Assembles and starts the remote relations worker tree.
pub struct RemoteRelationsBuilder {
    model_uuid: String,
    relations_facade: Option<Arc<dyn LocalRelationsFacade>>,
    new_remote_facade: Option<NewRemoteFacadeFn>,
    watcher_config: WatcherConfig,
    logger: Option<Dispatch>,
}

impl Default for RemoteRelationsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteRelationsBuilder {
    pub fn new() -> Self {
        Self {
            model_uuid: String::new(),
            relations_facade: None,
            new_remote_facade: None,
            watcher_config: WatcherConfig::default(),
            logger: None,
        }
    }

    /// Seeds the model identity and watcher tuning from loaded configuration.
    pub fn from_config(config: &RemoteRelationsConfig) -> Self {
        Self::new()
            .model_uuid(config.model.uuid.clone())
            .watcher_config(config.watcher)
    }

    /// Uuid of the model this worker runs in.
    pub fn model_uuid(
        mut self,
        model_uuid: impl Into<String>,
    ) -> Self {
        self.model_uuid = model_uuid.into();
        self
    }

    pub fn relations_facade(
        mut self,
        facade: Arc<dyn LocalRelationsFacade>,
    ) -> Self {
        self.relations_facade = Some(facade);
        self
    }

    /// Factory used to reach the model offering each remote application.
    pub fn new_remote_facade(
        mut self,
        new_remote_facade: NewRemoteFacadeFn,
    ) -> Self {
        self.new_remote_facade = Some(new_remote_facade);
        self
    }

    pub fn watcher_config(
        mut self,
        watcher_config: WatcherConfig,
    ) -> Self {
        self.watcher_config = watcher_config;
        self
    }

    /// Routes the whole worker tree's logs to `dispatch` instead of the
    /// global default subscriber.
    pub fn logger(
        mut self,
        dispatch: Dispatch,
    ) -> Self {
        self.logger = Some(dispatch);
        self
    }

    /// Validates the configuration and spawns the coordinator. Must be
    /// called from within a tokio runtime.
    pub fn start(self) -> Result<RemoteRelations> {
        if self.model_uuid.is_empty() {
            return Err(Error::InvalidConfig("model uuid must be set".into()));
        }
        let local = self
            .relations_facade
            .ok_or_else(|| Error::InvalidConfig("relations facade must be set".into()))?;
        let new_remote_facade = self
            .new_remote_facade
            .ok_or_else(|| Error::InvalidConfig("remote facade factory must be set".into()))?;
        self.watcher_config.validate()?;

        let (failures_tx, failures_rx) = failure_channel();
        let coordinator = Coordinator {
            model_uuid: self.model_uuid,
            local,
            new_remote_facade,
            watcher_config: self.watcher_config,
            workers: HashMap::new(),
            failures_tx,
            failures_rx,
        };

        let token = CancellationToken::new();
        let run_token = token.clone();
        // The span is entered under the same subscriber that records it.
        let task = async move {
            let span = info_span!("remote_relations", model = %coordinator.model_uuid);
            coordinator.run(run_token).instrument(span).await
        };
        let handle = match self.logger {
            Some(dispatch) => tokio::spawn(task.with_subscriber(dispatch)),
            None => tokio::spawn(task.with_current_subscriber()),
        };

        Ok(RemoteRelations { token, handle })
    }
}

/// Handle to a running worker tree.
pub struct RemoteRelations {
    token: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl RemoteRelations {
    /// Asks the tree to stop; returns immediately.
    pub fn kill(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits until every worker in the tree has stopped. A requested stop
    /// is reported as success.
    pub async fn wait(self) -> Result<()> {
        match self.handle.await? {
            Err(Error::Exit) => Ok(()),
            result => result,
        }
    }

    pub async fn stop(self) -> Result<()> {
        self.kill();
        self.wait().await
    }
}

struct Coordinator {
    model_uuid: String,
    local: Arc<dyn LocalRelationsFacade>,
    new_remote_facade: NewRemoteFacadeFn,
    watcher_config: WatcherConfig,
    /// Application workers keyed by remote application name.
    workers: HashMap<String, WorkerHandle>,
    failures_tx: FailureSender,
    failures_rx: FailureReceiver,
}

impl Coordinator {
    async fn run(
        mut self,
        token: CancellationToken,
    ) -> Result<()> {
        info!("remote relations worker started for model {}", self.model_uuid);
        let result = self.process(&token).await;

        stop_all(self.workers.drain().map(|(_, worker)| worker)).await;
        match &result {
            Ok(()) | Err(Error::Exit) => info!("remote relations worker stopped"),
            Err(e) => warn!("remote relations worker failed: {}", e),
        }
        result
    }

    async fn process(
        &mut self,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut applications = until_cancelled(token, self.local.watch_remote_applications()).await?;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Exit),
                Some(failure) = self.failures_rx.recv() => self.worker_failed(failure)?,
                change = applications.next() => match change {
                    Some(names) => self.applications_changed(token, names).await?,
                    None => return applications.finish(),
                },
            }
        }
    }

    async fn applications_changed(
        &mut self,
        token: &CancellationToken,
        names: Vec<String>,
    ) -> Result<()> {
        // Reap dead workers first so this batch can respawn them.
        while let Ok(failure) = self.failures_rx.try_recv() {
            self.worker_failed(failure)?;
        }

        debug!("remote applications changed: {:?}", names);
        let results = until_cancelled(token, self.local.remote_applications(names.clone())).await?;
        if results.len() != names.len() {
            return Err(FacadeError::Unexpected(format!(
                "expected {} remote applications, got {}",
                names.len(),
                results.len()
            ))
            .into());
        }

        for (name, result) in names.into_iter().zip(results) {
            match result {
                Err(FacadeError::NotFound(_)) => self.stop_worker(&name).await,
                Err(e) => warn!("cannot get remote application {}: {}", name, e),
                Ok(application) if application.life == Life::Dead => {
                    self.stop_worker(&name).await
                }
                Ok(application) if application.registered => {
                    debug!("ignoring registered application {}", name);
                }
                Ok(application) => {
                    if !self.workers.contains_key(&name) {
                        self.start_worker(token, application);
                    }
                }
            }
        }
        Ok(())
    }

    fn start_worker(
        &mut self,
        token: &CancellationToken,
        application: RemoteApplication,
    ) {
        let name = application.name.clone();
        let span = info_span!("remote_application", name = %name);
        let worker = RemoteApplicationWorker::new(
            application,
            self.model_uuid.clone(),
            self.local.clone(),
            self.new_remote_facade.clone(),
            self.watcher_config,
        );
        let handle = spawn_worker(
            format!("remote application {name}"),
            token,
            self.failures_tx.clone(),
            move |t| worker.run(t).instrument(span),
        );
        debug!("started worker {} for remote application {}", handle.id(), name);
        self.workers.insert(name, handle);
    }

    async fn stop_worker(
        &mut self,
        name: &str,
    ) {
        if let Some(worker) = self.workers.remove(name) {
            info!("stopping worker for remote application {}", name);
            if let Err(e) = worker.stop().await {
                warn!("waiting for remote application worker {}: {}", name, e);
            }
        }
    }

    /// Drops the failed worker when the failure only concerns its
    /// application; anything else stops the coordinator.
    fn worker_failed(
        &mut self,
        failure: ChildFailure,
    ) -> Result<()> {
        let name = self
            .workers
            .iter()
            .find(|(_, worker)| worker.id() == failure.id)
            .map(|(name, _)| name.clone());
        let Some(name) = name else {
            debug!("ignoring failure of stopped worker {}: {}", failure.name, failure.error);
            return Ok(());
        };

        if failure.error.is_application_scoped() {
            warn!(
                "worker for remote application {} failed, restarting on next change: {}",
                name, failure.error
            );
            self.workers.remove(&name);
            return Ok(());
        }
        Err(failure.error)
    }
}
