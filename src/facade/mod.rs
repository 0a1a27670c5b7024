//! Capabilities the worker tree consumes from the two models.
//!
//! [`LocalRelationsFacade`] talks to the model this worker runs in;
//! [`RemoteRelationsFacade`] talks to the model offering an application and
//! is built on demand from that model's controller connection info. Both are
//! plain traits so production code can sit on any transport and tests can
//! substitute doubles.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::params::ApiInfo;
use crate::params::Macaroon;
use crate::params::RegisterRemoteRelationArg;
use crate::params::RelationStatusChange;
use crate::params::RelationUnit;
use crate::params::RelationUnitsChange;
use crate::params::RemoteApplication;
use crate::params::RemoteRelation;
use crate::params::RemoteRelationChangeEvent;
use crate::params::RemoteRelationDetails;
use crate::params::RemoteRelationUnit;
use crate::params::Settings;
use crate::params::Tag;
use crate::watcher::Watcher;
use crate::FacadeError;
use crate::Result;

/// Outcome of one entry in a bulk facade call.
pub type FacadeResult<T> = std::result::Result<T, FacadeError>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LocalRelationsFacade: Send + Sync + 'static {
    /// Names of remote applications that changed.
    async fn watch_remote_applications(&self) -> Result<Watcher<Vec<String>>>;

    /// One result per name, in request order. Removed applications come back
    /// as `FacadeError::NotFound`.
    async fn remote_applications(
        &self,
        names: Vec<String>,
    ) -> Result<Vec<FacadeResult<RemoteApplication>>>;

    /// Keys of relations involving `application` that changed.
    async fn watch_remote_application_relations(
        &self,
        application: String,
    ) -> Result<Watcher<Vec<String>>>;

    /// One result per key, in request order.
    async fn relations(
        &self,
        keys: Vec<String>,
    ) -> Result<Vec<FacadeResult<RemoteRelation>>>;

    async fn watch_local_relation_units(
        &self,
        relation_key: String,
    ) -> Result<Watcher<RelationUnitsChange>>;

    /// Local life and suspension changes of a relation. Part of the local
    /// API surface but not watched by this worker tree: local suspension is
    /// picked up by re-reading the relation when its key shows up in a
    /// relations batch.
    async fn watch_relation_suspended_status(
        &self,
        relation_key: String,
    ) -> Result<Watcher<Vec<RelationStatusChange>>>;

    async fn relation_unit_settings(
        &self,
        units: Vec<RelationUnit>,
    ) -> Result<Vec<FacadeResult<Settings>>>;

    /// Tokens for local entities, in request order.
    async fn export_entities(
        &self,
        tags: Vec<Tag>,
    ) -> Result<Vec<FacadeResult<String>>>;

    /// Records the token another model uses for one of our proxies.
    async fn import_remote_entity(
        &self,
        tag: Tag,
        token: String,
    ) -> Result<()>;

    async fn save_macaroon(
        &self,
        relation: Tag,
        macaroon: Macaroon,
    ) -> Result<()>;

    async fn get_token(
        &self,
        tag: Tag,
    ) -> Result<String>;

    async fn controller_api_info_for_model(
        &self,
        model_uuid: String,
    ) -> Result<ApiInfo>;

    async fn consume_remote_relation_change(
        &self,
        event: RemoteRelationChangeEvent,
    ) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteRelationsFacade: Send + Sync + 'static {
    async fn register_remote_relations(
        &self,
        relations: Vec<RegisterRemoteRelationArg>,
    ) -> Result<Vec<FacadeResult<RemoteRelationDetails>>>;

    async fn watch_relation_units(
        &self,
        relation_token: String,
        macaroons: Vec<Macaroon>,
    ) -> Result<Watcher<RelationUnitsChange>>;

    async fn watch_relation_suspended_status(
        &self,
        relation_token: String,
        macaroons: Vec<Macaroon>,
    ) -> Result<Watcher<Vec<RelationStatusChange>>>;

    async fn publish_relation_change(
        &self,
        event: RemoteRelationChangeEvent,
    ) -> Result<()>;

    async fn relation_unit_settings(
        &self,
        units: Vec<RemoteRelationUnit>,
    ) -> Result<Vec<FacadeResult<Settings>>>;

    /// Releases the connection to the remote model.
    async fn close(&self) -> Result<()>;
}

/// Builds a facade for the remote model reachable through `info`.
pub type NewRemoteFacadeFn =
    Arc<dyn Fn(&ApiInfo) -> Result<Arc<dyn RemoteRelationsFacade>> + Send + Sync>;
