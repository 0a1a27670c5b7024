//! Worker owning one remote application's relation sub-tree.
//!
//! The worker watches the relations of its application, registers each new
//! relation with the offering model, and runs three leaf watchers per
//! relation: local units, remote units and remote status. Their batches are
//! translated here and applied through the opposite facade.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::info_span;
use tracing::warn;
use tracing::Instrument;

use super::relation_units::RelationChange;
use super::relation_units::RelationStatusWorker;
use super::relation_units::RelationUnitsWorker;
use super::translate;
use crate::config::WatcherConfig;
use crate::facade::LocalRelationsFacade;
use crate::facade::NewRemoteFacadeFn;
use crate::facade::RemoteRelationsFacade;
use crate::params::ApiInfo;
use crate::params::Macaroon;
use crate::params::RegisterRemoteRelationArg;
use crate::params::RelationStatusChange;
use crate::params::RelationUnitsChange;
use crate::params::RemoteApplication;
use crate::params::RemoteRelation;
use crate::params::Tag;
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
use crate::RelationError;
use crate::Result;

type UnitsChange = RelationChange<RelationUnitsChange>;
type StatusChange = RelationChange<Vec<RelationStatusChange>>;

/// Everything cached for one registered relation.
struct RelationState {
    key: String,
    /// Unique per registration. Batches forwarded by an earlier registration
    /// of the same key carry a different id and are dropped.
    registration: String,
    tag: Tag,
    suspended: bool,
    /// Token of the local application, exported to the offering model.
    application_token: String,
    relation_token: String,
    /// Token the offering model assigned to the remote application.
    remote_application_token: String,
    macaroon: Macaroon,
    /// Facade the relation was registered through.
    remote: Arc<dyn RemoteRelationsFacade>,
    watchers: Vec<WorkerHandle>,
}

impl RelationState {
    fn owns_worker(
        &self,
        id: &str,
    ) -> bool {
        self.watchers.iter().any(|w| w.id() == id)
    }
}

struct RemoteFacadeHandle {
    info: ApiInfo,
    facade: Arc<dyn RemoteRelationsFacade>,
}

pub(crate) struct RemoteApplicationWorker {
    application: RemoteApplication,
    local_model_uuid: String,
    local: Arc<dyn LocalRelationsFacade>,
    new_remote_facade: NewRemoteFacadeFn,
    remote: Option<RemoteFacadeHandle>,
    /// Facades replaced after a connection info change; relations registered
    /// through them keep using them until teardown.
    retired: Vec<Arc<dyn RemoteRelationsFacade>>,
    relations: HashMap<String, RelationState>,

    local_units_tx: mpsc::Sender<UnitsChange>,
    local_units_rx: mpsc::Receiver<UnitsChange>,
    remote_units_tx: mpsc::Sender<UnitsChange>,
    remote_units_rx: mpsc::Receiver<UnitsChange>,
    remote_status_tx: mpsc::Sender<StatusChange>,
    remote_status_rx: mpsc::Receiver<StatusChange>,
    failures_tx: FailureSender,
    failures_rx: FailureReceiver,
}

impl RemoteApplicationWorker {
    pub(crate) fn new(
        application: RemoteApplication,
        local_model_uuid: String,
        local: Arc<dyn LocalRelationsFacade>,
        new_remote_facade: NewRemoteFacadeFn,
        watcher_config: WatcherConfig,
    ) -> Self {
        let capacity = watcher_config.channel_capacity.max(1);
        let (local_units_tx, local_units_rx) = mpsc::channel(capacity);
        let (remote_units_tx, remote_units_rx) = mpsc::channel(capacity);
        let (remote_status_tx, remote_status_rx) = mpsc::channel(capacity);
        let (failures_tx, failures_rx) = failure_channel();
        Self {
            application,
            local_model_uuid,
            local,
            new_remote_facade,
            remote: None,
            retired: Vec::new(),
            relations: HashMap::new(),
            local_units_tx,
            local_units_rx,
            remote_units_tx,
            remote_units_rx,
            remote_status_tx,
            remote_status_rx,
            failures_tx,
            failures_rx,
        }
    }

    pub(crate) async fn run(
        mut self,
        token: CancellationToken,
    ) -> Result<()> {
        info!("starting relation watchers for remote application {}", self.application.name);
        let result = self.process(&token).await;
        self.teardown().await;
        result
    }

    async fn process(
        &mut self,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut relations_watcher = until_cancelled(
            token,
            self.local
                .watch_remote_application_relations(self.application.name.clone()),
        )
        .await?;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Exit),
                Some(failure) = self.failures_rx.recv() => {
                    self.relation_watcher_failed(token, failure).await?;
                }
                change = relations_watcher.next() => match change {
                    Some(keys) => self.relations_changed(token, keys).await?,
                    None => return relations_watcher.finish(),
                },
                Some(change) = self.local_units_rx.recv() => {
                    self.local_relation_units_changed(token, change).await?;
                }
                Some(change) = self.remote_units_rx.recv() => {
                    self.remote_relation_units_changed(token, change).await?;
                }
                Some(change) = self.remote_status_rx.recv() => {
                    self.remote_relation_status_changed(token, change).await?;
                }
            }
        }
    }

    async fn relation_watcher_failed(
        &mut self,
        token: &CancellationToken,
        failure: ChildFailure,
    ) -> Result<()> {
        let key = self
            .relations
            .values()
            .find(|r| r.owns_worker(&failure.id))
            .map(|r| r.key.clone());
        let Some(key) = key else {
            debug!("ignoring failure of stopped watcher {}: {}", failure.name, failure.error);
            return Ok(());
        };
        if failure.error.is_not_found() {
            info!("relation {} is gone ({}), removing it", key, failure.error);
            return self.remove_relation(token, &key).await;
        }
        Err(RelationError::Watch {
            relation_key: key,
            model_uuid: self.application.model_uuid.clone(),
            source: Box::new(failure.error),
        }
        .into())
    }

    async fn relations_changed(
        &mut self,
        token: &CancellationToken,
        keys: Vec<String>,
    ) -> Result<()> {
        debug!("relations changed: {:?}", keys);
        let results = until_cancelled(token, self.local.relations(keys.clone())).await?;
        if results.len() != keys.len() {
            return Err(FacadeError::Unexpected(format!(
                "expected {} relations, got {}",
                keys.len(),
                results.len()
            ))
            .into());
        }

        for (key, result) in keys.into_iter().zip(results) {
            match result {
                Err(FacadeError::NotFound(_)) => {
                    debug!("relation {} removed", key);
                    self.remove_relation(token, &key).await?;
                }
                Err(e) => {
                    warn!("cannot get relation {}: {}", key, e);
                }
                Ok(relation) => self.relation_changed(token, relation).await?,
            }
        }
        Ok(())
    }

    async fn relation_changed(
        &mut self,
        token: &CancellationToken,
        relation: RemoteRelation,
    ) -> Result<()> {
        let known_suspended = self.relations.get(&relation.key).map(|r| r.suspended);

        match known_suspended {
            Some(_) if !relation.life.is_alive() => {
                debug!("relation {} is {}", relation.key, relation.life);
                self.remove_relation(token, &relation.key).await
            }
            Some(suspended) => {
                if suspended != relation.suspended {
                    self.publish_suspended(token, &relation.key, relation.suspended)
                        .await?;
                }
                Ok(())
            }
            None if !relation.life.is_alive() => {
                debug!("ignoring {} relation {}", relation.life, relation.key);
                Ok(())
            }
            None => match self.register_relation(token, &relation).await {
                Ok(state) => {
                    self.relations.insert(relation.key.clone(), state);
                    Ok(())
                }
                Err(Error::Exit) => Err(Error::Exit),
                Err(e) => {
                    warn!(
                        "cannot register relation {}: {}; retrying on next change",
                        relation.key, e
                    );
                    Ok(())
                }
            },
        }
    }

    /// Registers a newly seen relation with the offering model and starts
    /// its watchers. Failures leave the relation unregistered.
    async fn register_relation(
        &mut self,
        token: &CancellationToken,
        relation: &RemoteRelation,
    ) -> Result<RelationState> {
        let info = until_cancelled(
            token,
            self.local
                .controller_api_info_for_model(self.application.model_uuid.clone()),
        )
        .await?;
        let remote = self.remote_facade_for(info)?;

        let relation_tag = Tag::relation(relation.key.as_str());
        let tokens = until_cancelled(
            token,
            self.local.export_entities(vec![
                Tag::application(relation.application_name.as_str()),
                relation_tag.clone(),
            ]),
        )
        .await?;
        let mut tokens = tokens.into_iter();
        let application_token = tokens
            .next()
            .ok_or_else(|| FacadeError::Unexpected("missing application token".into()))??;
        let relation_token = tokens
            .next()
            .ok_or_else(|| FacadeError::Unexpected("missing relation token".into()))??;

        let arg = RegisterRemoteRelationArg {
            application_token: application_token.clone(),
            source_model_tag: Tag::model(self.local_model_uuid.as_str()).to_string(),
            relation_token: relation_token.clone(),
            remote_endpoint: relation.endpoint.clone(),
            offer_uuid: self.application.offer_uuid.clone(),
            local_endpoint_name: relation.remote_endpoint_name.clone(),
            macaroons: vec![self.application.macaroon.clone()],
        };
        let details = until_cancelled(token, remote.register_remote_relations(vec![arg]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FacadeError::Unexpected("missing registration result".into()))??;

        until_cancelled(
            token,
            self.local
                .save_macaroon(relation_tag.clone(), details.macaroon.clone()),
        )
        .await?;
        until_cancelled(
            token,
            self.local.import_remote_entity(
                Tag::application(self.application.name.as_str()),
                details.token.clone(),
            ),
        )
        .await?;

        let registration = nanoid::nanoid!(10);
        let watchers = self
            .start_relation_watchers(
                token,
                &relation.key,
                &registration,
                &relation_token,
                &details.macaroon,
                &remote,
            )
            .await?;
        info!("registered relation {} with remote model {}", relation.key, self.application.model_uuid);

        Ok(RelationState {
            key: relation.key.clone(),
            registration,
            tag: relation_tag,
            suspended: relation.suspended,
            application_token,
            relation_token,
            remote_application_token: details.token,
            macaroon: details.macaroon,
            remote,
            watchers,
        })
    }

    async fn start_relation_watchers(
        &self,
        token: &CancellationToken,
        key: &str,
        registration: &str,
        relation_token: &str,
        macaroon: &Macaroon,
        remote: &Arc<dyn RemoteRelationsFacade>,
    ) -> Result<Vec<WorkerHandle>> {
        // Watchers obtained before a failure are killed when dropped.
        let local_units =
            until_cancelled(token, self.local.watch_local_relation_units(key.to_string())).await?;
        let remote_units = until_cancelled(
            token,
            remote.watch_relation_units(relation_token.to_string(), vec![macaroon.clone()]),
        )
        .await?;
        let remote_status = until_cancelled(
            token,
            remote.watch_relation_suspended_status(relation_token.to_string(), vec![macaroon.clone()]),
        )
        .await?;

        let worker = RelationUnitsWorker::new(key, registration, local_units, self.local_units_tx.clone());
        let span = info_span!("relation_units", key = %key, side = "local");
        let local_handle = spawn_worker(
            format!("local units of {key}"),
            token,
            self.failures_tx.clone(),
            move |t| worker.run(t).instrument(span),
        );

        let worker = RelationUnitsWorker::new(key, registration, remote_units, self.remote_units_tx.clone());
        let span = info_span!("relation_units", key = %key, side = "remote");
        let remote_handle = spawn_worker(
            format!("remote units of {key}"),
            token,
            self.failures_tx.clone(),
            move |t| worker.run(t).instrument(span),
        );

        let worker = RelationStatusWorker::new(key, registration, remote_status, self.remote_status_tx.clone());
        let span = info_span!("relation_status", key = %key);
        let status_handle = spawn_worker(
            format!("remote status of {key}"),
            token,
            self.failures_tx.clone(),
            move |t| worker.run(t).instrument(span),
        );

        Ok(vec![local_handle, remote_handle, status_handle])
    }

    /// Facade for the remote model reachable through `info`, rebuilt when
    /// the connection info changed since the last one was built.
    fn remote_facade_for(
        &mut self,
        info: ApiInfo,
    ) -> Result<Arc<dyn RemoteRelationsFacade>> {
        if let Some(current) = &self.remote {
            if current.info == info {
                return Ok(current.facade.clone());
            }
            info!(
                "connection info for remote model {} changed, reconnecting",
                self.application.model_uuid
            );
        }
        let facade = (self.new_remote_facade)(&info)?;
        if let Some(previous) = self.remote.replace(RemoteFacadeHandle {
            info,
            facade: facade.clone(),
        }) {
            self.retired.push(previous.facade);
        }
        Ok(facade)
    }

    /// Tells the offering model the relation is dying, then stops its
    /// watchers. Delivery of the notification is best-effort.
    async fn remove_relation(
        &mut self,
        token: &CancellationToken,
        key: &str,
    ) -> Result<()> {
        let Some(state) = self.relations.remove(key) else {
            return Ok(());
        };

        let relation_token = match until_cancelled(token, self.local.get_token(state.tag.clone())).await {
            Ok(relation_token) => relation_token,
            Err(Error::Exit) => {
                stop_all(state.watchers).await;
                return Err(Error::Exit);
            }
            Err(e) => {
                debug!("cannot refresh token for relation {}: {}; using cached token", key, e);
                state.relation_token.clone()
            }
        };
        let event = translate::dying_event(&state.application_token, &relation_token, &state.macaroon);
        let published = until_cancelled(token, state.remote.publish_relation_change(event)).await;

        stop_all(state.watchers).await;
        match published {
            Ok(()) => {
                info!("relation {} removed", key);
                Ok(())
            }
            Err(Error::Exit) => Err(Error::Exit),
            Err(e) => {
                warn!("cannot notify remote model that relation {} is dying: {}", key, e);
                Ok(())
            }
        }
    }

    async fn publish_suspended(
        &mut self,
        token: &CancellationToken,
        key: &str,
        suspended: bool,
    ) -> Result<()> {
        let Some(state) = self.relations.get(key) else {
            return Ok(());
        };
        let event = translate::suspended_event(
            &state.application_token,
            &state.relation_token,
            suspended,
            &state.macaroon,
        );
        let remote = state.remote.clone();
        info!("relation {} suspended changed to {}", key, suspended);
        until_cancelled(token, remote.publish_relation_change(event))
            .await
            .map_err(|e| self.publish_error(key, e))?;
        if let Some(state) = self.relations.get_mut(key) {
            state.suspended = suspended;
        }
        Ok(())
    }

    /// State owning `change`, or `None` when the relation is gone or was
    /// registered again since the batch was produced.
    fn relation_for<C>(
        &self,
        change: &RelationChange<C>,
    ) -> Option<&RelationState> {
        self.relations
            .get(&change.relation_key)
            .filter(|state| state.registration == change.registration)
    }

    async fn local_relation_units_changed(
        &self,
        token: &CancellationToken,
        change: UnitsChange,
    ) -> Result<()> {
        let Some(state) = self.relation_for(&change) else {
            debug!("ignoring local units change for stale or unknown relation {}", change.relation_key);
            return Ok(());
        };
        let changed = translate::changed_units(&change.change);
        let departed = translate::departed_unit_ids(&change.change);
        if changed.is_empty() && departed.is_empty() {
            return Ok(());
        }

        let changed_units = until_cancelled(
            token,
            translate::local_unit_changes(self.local.as_ref(), &state.tag, &changed),
        )
        .await
        .map_err(|e| self.settings_error(&state.key, e))?;
        let event = translate::units_change_event(
            &state.application_token,
            &state.relation_token,
            changed_units,
            departed,
            &state.macaroon,
        );
        debug!("publishing local units change for relation {}: {:?}", state.key, event);
        until_cancelled(token, state.remote.publish_relation_change(event))
            .await
            .map_err(|e| self.publish_error(&state.key, e))
    }

    async fn remote_relation_units_changed(
        &self,
        token: &CancellationToken,
        change: UnitsChange,
    ) -> Result<()> {
        let Some(state) = self.relation_for(&change) else {
            debug!("ignoring remote units change for stale or unknown relation {}", change.relation_key);
            return Ok(());
        };
        let changed = translate::changed_units(&change.change);
        let departed = translate::departed_unit_ids(&change.change);
        if changed.is_empty() && departed.is_empty() {
            return Ok(());
        }

        let changed_units = until_cancelled(
            token,
            translate::remote_unit_changes(
                state.remote.as_ref(),
                &state.relation_token,
                &state.macaroon,
                &changed,
            ),
        )
        .await
        .map_err(|e| self.settings_error(&state.key, e))?;
        let event = translate::units_change_event(
            &state.remote_application_token,
            &state.relation_token,
            changed_units,
            departed,
            &state.macaroon,
        );
        debug!("consuming remote units change for relation {}: {:?}", state.key, event);
        until_cancelled(token, self.local.consume_remote_relation_change(event))
            .await
            .map_err(|e| self.consume_error(&state.key, e))
    }

    async fn remote_relation_status_changed(
        &self,
        token: &CancellationToken,
        change: StatusChange,
    ) -> Result<()> {
        let Some(state) = self.relation_for(&change) else {
            debug!("ignoring status change for stale or unknown relation {}", change.relation_key);
            return Ok(());
        };
        for status in &change.change {
            let event = translate::status_change_event(
                &state.remote_application_token,
                &state.relation_token,
                status,
            );
            debug!("consuming remote status change for relation {}: {:?}", state.key, event);
            until_cancelled(token, self.local.consume_remote_relation_change(event))
                .await
                .map_err(|e| self.consume_error(&state.key, e))?;
        }
        Ok(())
    }

    fn publish_error(
        &self,
        key: &str,
        e: Error,
    ) -> Error {
        if e.is_exit() {
            return e;
        }
        RelationError::Publish {
            relation_key: key.to_string(),
            model_uuid: self.application.model_uuid.clone(),
            source: Box::new(e),
        }
        .into()
    }

    fn consume_error(
        &self,
        key: &str,
        e: Error,
    ) -> Error {
        if e.is_exit() {
            return e;
        }
        RelationError::Consume {
            relation_key: key.to_string(),
            model_uuid: self.application.model_uuid.clone(),
            source: Box::new(e),
        }
        .into()
    }

    fn settings_error(
        &self,
        key: &str,
        e: Error,
    ) -> Error {
        if e.is_exit() {
            return e;
        }
        RelationError::Settings {
            relation_key: key.to_string(),
            model_uuid: self.application.model_uuid.clone(),
            source: Box::new(e),
        }
        .into()
    }

    /// Stops every relation's watchers and closes the remote facades.
    async fn teardown(&mut self) {
        let watchers: Vec<WorkerHandle> = self
            .relations
            .drain()
            .flat_map(|(_, state)| state.watchers)
            .collect();
        stop_all(watchers).await;

        let mut facades: Vec<Arc<dyn RemoteRelationsFacade>> = self.retired.drain(..).collect();
        if let Some(current) = self.remote.take() {
            facades.push(current.facade);
        }
        for facade in facades {
            if let Err(e) = facade.close().await {
                warn!(
                    "closing connection to remote model {}: {}",
                    self.application.model_uuid, e
                );
            }
        }
        debug!("remote application worker for {} stopped", self.application.name);
    }
}
