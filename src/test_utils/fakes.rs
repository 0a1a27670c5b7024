//! In-memory relations facades backed by a shared call log.
//!
//! Both fakes record into the same [`Stub`], so a test sees local and remote
//! calls interleaved in the order the worker tree made them. Errors are
//! injected per method and consumed one call at a time.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::facade::FacadeResult;
use crate::facade::LocalRelationsFacade;
use crate::facade::NewRemoteFacadeFn;
use crate::facade::RemoteRelationsFacade;
use crate::params::ApiInfo;
use crate::params::Life;
use crate::params::Macaroon;
use crate::params::RegisterRemoteRelationArg;
use crate::params::RelationStatusChange;
use crate::params::RelationUnit;
use crate::params::RelationUnitsChange;
use crate::params::RemoteApplication;
use crate::params::RemoteEndpoint;
use crate::params::RemoteRelation;
use crate::params::RemoteRelationChangeEvent;
use crate::params::RemoteRelationDetails;
use crate::params::RemoteRelationUnit;
use crate::params::Settings;
use crate::params::Tag;
use crate::watcher;
use crate::watcher::Watcher;
use crate::watcher::WatcherSink;
use crate::Error;
use crate::FacadeError;
use crate::Result;

const FAKE_WATCHER_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    WatchRemoteApplications,
    RemoteApplications(Vec<String>),
    WatchRemoteApplicationRelations(String),
    Relations(Vec<String>),
    WatchLocalRelationUnits(String),
    WatchLocalRelationSuspendedStatus(String),
    RelationUnitSettings(Vec<RelationUnit>),
    ExportEntities(Vec<Tag>),
    ImportRemoteEntity(Tag, String),
    SaveMacaroon(Tag, Macaroon),
    GetToken(Tag),
    ControllerApiInfoForModel(String),
    ConsumeRemoteRelationChange(RemoteRelationChangeEvent),

    RegisterRemoteRelations(Vec<RegisterRemoteRelationArg>),
    WatchRelationUnits(String, Vec<Macaroon>),
    WatchRelationSuspendedStatus(String, Vec<Macaroon>),
    PublishRelationChange(RemoteRelationChangeEvent),
    RemoteRelationUnitSettings(Vec<RemoteRelationUnit>),
    Close,
}

impl Call {
    pub fn method(&self) -> &'static str {
        match self {
            Call::WatchRemoteApplications => "WatchRemoteApplications",
            Call::RemoteApplications(_) => "RemoteApplications",
            Call::WatchRemoteApplicationRelations(_) => "WatchRemoteApplicationRelations",
            Call::Relations(_) => "Relations",
            Call::WatchLocalRelationUnits(_) => "WatchLocalRelationUnits",
            Call::WatchLocalRelationSuspendedStatus(_) => "WatchLocalRelationSuspendedStatus",
            Call::RelationUnitSettings(_) => "RelationUnitSettings",
            Call::ExportEntities(_) => "ExportEntities",
            Call::ImportRemoteEntity(..) => "ImportRemoteEntity",
            Call::SaveMacaroon(..) => "SaveMacaroon",
            Call::GetToken(_) => "GetToken",
            Call::ControllerApiInfoForModel(_) => "ControllerApiInfoForModel",
            Call::ConsumeRemoteRelationChange(_) => "ConsumeRemoteRelationChange",
            Call::RegisterRemoteRelations(_) => "RegisterRemoteRelations",
            Call::WatchRelationUnits(..) => "WatchRelationUnits",
            Call::WatchRelationSuspendedStatus(..) => "WatchRelationSuspendedStatus",
            Call::PublishRelationChange(_) => "PublishRelationChange",
            Call::RemoteRelationUnitSettings(_) => "RemoteRelationUnitSettings",
            Call::Close => "Close",
        }
    }
}

/// Call log with per-method error injection.
#[derive(Default)]
pub struct Stub {
    calls: Mutex<Vec<Call>>,
    errors: Mutex<HashMap<&'static str, VecDeque<Option<FacadeError>>>>,
}

impl Stub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records `call` and returns the next injected outcome for its method.
    pub fn record(
        &self,
        call: Call,
    ) -> Result<()> {
        let method = call.method();
        self.calls.lock().push(call);
        let next = self
            .errors
            .lock()
            .get_mut(method)
            .and_then(|queue| queue.pop_front())
            .flatten();
        match next {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Queues outcomes for the next calls of `method`; `None` lets a call
    /// succeed.
    pub fn set_errors(
        &self,
        method: &'static str,
        errors: Vec<Option<FacadeError>>,
    ) {
        self.errors.lock().entry(method).or_default().extend(errors);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

/// Settings every fake unit reports.
pub fn fake_settings() -> Settings {
    Settings::from([("foo".to_string(), "bar".to_string())])
}

/// Token the fakes hand out for a local entity.
pub fn token_for(tag: &Tag) -> String {
    format!("token-{}", tag.id())
}

pub fn test_remote_application(
    name: &str,
    model_uuid: &str,
) -> RemoteApplication {
    RemoteApplication {
        name: name.to_string(),
        offer_url: format!("other/{name}"),
        offer_uuid: format!("offer-{name}-uuid"),
        model_uuid: model_uuid.to_string(),
        life: Life::Alive,
        registered: false,
        macaroon: Macaroon::new("test", ""),
    }
}

/// Relation `<remote app>:db <local app>:db`.
pub fn test_relation(
    id: i64,
    remote_application: &str,
    local_application: &str,
) -> RemoteRelation {
    RemoteRelation {
        id,
        key: format!("{remote_application}:db {local_application}:db"),
        life: Life::Alive,
        suspended: false,
        application_name: local_application.to_string(),
        endpoint: RemoteEndpoint {
            name: "database".to_string(),
            role: "provider".to_string(),
            interface: "mysql".to_string(),
        },
        remote_endpoint_name: "data".to_string(),
        source_model_uuid: "remote-model-uuid".to_string(),
    }
}

pub fn test_api_info(model_uuid: &str) -> ApiInfo {
    ApiInfo {
        addrs: vec!["1.2.3.4:1234".to_string()],
        ca_cert: "cert".to_string(),
        model_uuid: model_uuid.to_string(),
    }
}

#[derive(Default)]
struct LocalState {
    applications: HashMap<String, RemoteApplication>,
    relations: HashMap<String, RemoteRelation>,
    api_info: HashMap<String, ApiInfo>,
    relations_sinks: HashMap<String, WatcherSink<Vec<String>>>,
    relation_units_sinks: HashMap<String, WatcherSink<RelationUnitsChange>>,
    status_sinks: HashMap<String, WatcherSink<Vec<RelationStatusChange>>>,
}

/// Local model double. Its applications watcher exists from construction,
/// so batches can be queued before the worker tree subscribes.
pub struct FakeLocalFacade {
    stub: Arc<Stub>,
    state: Mutex<LocalState>,
    applications_sink: Mutex<Option<WatcherSink<Vec<String>>>>,
    applications_watcher: Mutex<Option<Watcher<Vec<String>>>>,
}

impl FakeLocalFacade {
    pub fn new(stub: Arc<Stub>) -> Arc<Self> {
        let (sink, watcher) = watcher::channel("remote applications", FAKE_WATCHER_CAPACITY);
        Arc::new(Self {
            stub,
            state: Mutex::new(LocalState::default()),
            applications_sink: Mutex::new(Some(sink)),
            applications_watcher: Mutex::new(Some(watcher)),
        })
    }

    pub fn add_application(
        &self,
        application: RemoteApplication,
    ) {
        self.state
            .lock()
            .applications
            .insert(application.name.clone(), application);
    }

    pub fn remove_application(
        &self,
        name: &str,
    ) {
        self.state.lock().applications.remove(name);
    }

    pub fn update_application_life(
        &self,
        name: &str,
        life: Life,
    ) {
        if let Some(application) = self.state.lock().applications.get_mut(name) {
            application.life = life;
        }
    }

    pub fn add_relation(
        &self,
        relation: RemoteRelation,
    ) {
        self.state
            .lock()
            .relations
            .insert(relation.key.clone(), relation);
    }

    pub fn remove_relation(
        &self,
        key: &str,
    ) {
        self.state.lock().relations.remove(key);
    }

    pub fn update_relation_life(
        &self,
        key: &str,
        life: Life,
    ) {
        if let Some(relation) = self.state.lock().relations.get_mut(key) {
            relation.life = life;
        }
    }

    pub fn set_relation_suspended(
        &self,
        key: &str,
        suspended: bool,
    ) {
        if let Some(relation) = self.state.lock().relations.get_mut(key) {
            relation.suspended = suspended;
        }
    }

    pub fn set_controller_info(
        &self,
        model_uuid: &str,
        info: ApiInfo,
    ) {
        self.state.lock().api_info.insert(model_uuid.to_string(), info);
    }

    pub fn clear_controller_info(
        &self,
        model_uuid: &str,
    ) {
        self.state.lock().api_info.remove(model_uuid);
    }

    pub fn applications_watcher(&self) -> WatcherSink<Vec<String>> {
        self.applications_sink
            .lock()
            .clone()
            .expect("applications watcher already closed")
    }

    /// Ends the applications stream, optionally with an error.
    pub fn close_applications_watcher(
        &self,
        error: Option<Error>,
    ) {
        if let Some(sink) = self.applications_sink.lock().take() {
            if let Some(e) = error {
                sink.fail(e);
            }
        }
    }

    pub fn relations_watcher(
        &self,
        application: &str,
    ) -> WatcherSink<Vec<String>> {
        self.state
            .lock()
            .relations_sinks
            .get(application)
            .cloned()
            .unwrap_or_else(|| panic!("no relations watcher for {application}"))
    }

    pub fn has_relations_watcher(
        &self,
        application: &str,
    ) -> bool {
        self.state.lock().relations_sinks.contains_key(application)
    }

    pub fn relation_units_watcher(
        &self,
        key: &str,
    ) -> WatcherSink<RelationUnitsChange> {
        self.state
            .lock()
            .relation_units_sinks
            .get(key)
            .cloned()
            .unwrap_or_else(|| panic!("no local relation units watcher for {key}"))
    }

    /// Ends the local units stream of `key` with `error`.
    pub fn fail_relation_units_watcher(
        &self,
        key: &str,
        error: Error,
    ) {
        if let Some(sink) = self.state.lock().relation_units_sinks.remove(key) {
            sink.fail(error);
        }
    }
}

#[async_trait]
impl LocalRelationsFacade for FakeLocalFacade {
    async fn watch_remote_applications(&self) -> Result<Watcher<Vec<String>>> {
        self.stub.record(Call::WatchRemoteApplications)?;
        if let Some(watcher) = self.applications_watcher.lock().take() {
            return Ok(watcher);
        }
        let (sink, watcher) = watcher::channel("remote applications", FAKE_WATCHER_CAPACITY);
        *self.applications_sink.lock() = Some(sink);
        Ok(watcher)
    }

    async fn remote_applications(
        &self,
        names: Vec<String>,
    ) -> Result<Vec<FacadeResult<RemoteApplication>>> {
        self.stub.record(Call::RemoteApplications(names.clone()))?;
        let state = self.state.lock();
        Ok(names
            .iter()
            .map(|name| {
                state
                    .applications
                    .get(name)
                    .cloned()
                    .ok_or_else(|| FacadeError::NotFound(format!("application {name}")))
            })
            .collect())
    }

    async fn watch_remote_application_relations(
        &self,
        application: String,
    ) -> Result<Watcher<Vec<String>>> {
        self.stub
            .record(Call::WatchRemoteApplicationRelations(application.clone()))?;
        let (sink, watcher) = watcher::channel(format!("{application} relations"), FAKE_WATCHER_CAPACITY);
        self.state.lock().relations_sinks.insert(application, sink);
        Ok(watcher)
    }

    async fn relations(
        &self,
        keys: Vec<String>,
    ) -> Result<Vec<FacadeResult<RemoteRelation>>> {
        self.stub.record(Call::Relations(keys.clone()))?;
        let state = self.state.lock();
        Ok(keys
            .iter()
            .map(|key| {
                state
                    .relations
                    .get(key)
                    .cloned()
                    .ok_or_else(|| FacadeError::NotFound(format!("relation {key}")))
            })
            .collect())
    }

    async fn watch_local_relation_units(
        &self,
        relation_key: String,
    ) -> Result<Watcher<RelationUnitsChange>> {
        self.stub
            .record(Call::WatchLocalRelationUnits(relation_key.clone()))?;
        let (sink, watcher) = watcher::channel("local relation units", FAKE_WATCHER_CAPACITY);
        self.state.lock().relation_units_sinks.insert(relation_key, sink);
        Ok(watcher)
    }

    async fn watch_relation_suspended_status(
        &self,
        relation_key: String,
    ) -> Result<Watcher<Vec<RelationStatusChange>>> {
        self.stub
            .record(Call::WatchLocalRelationSuspendedStatus(relation_key.clone()))?;
        let (sink, watcher) = watcher::channel("local relation status", FAKE_WATCHER_CAPACITY);
        self.state.lock().status_sinks.insert(relation_key, sink);
        Ok(watcher)
    }

    async fn relation_unit_settings(
        &self,
        units: Vec<RelationUnit>,
    ) -> Result<Vec<FacadeResult<Settings>>> {
        let count = units.len();
        self.stub.record(Call::RelationUnitSettings(units))?;
        Ok((0..count).map(|_| Ok(fake_settings())).collect())
    }

    async fn export_entities(
        &self,
        tags: Vec<Tag>,
    ) -> Result<Vec<FacadeResult<String>>> {
        self.stub.record(Call::ExportEntities(tags.clone()))?;
        Ok(tags.iter().map(|tag| Ok(token_for(tag))).collect())
    }

    async fn import_remote_entity(
        &self,
        tag: Tag,
        token: String,
    ) -> Result<()> {
        self.stub.record(Call::ImportRemoteEntity(tag, token))
    }

    async fn save_macaroon(
        &self,
        relation: Tag,
        macaroon: Macaroon,
    ) -> Result<()> {
        self.stub.record(Call::SaveMacaroon(relation, macaroon))
    }

    async fn get_token(
        &self,
        tag: Tag,
    ) -> Result<String> {
        let token = token_for(&tag);
        self.stub.record(Call::GetToken(tag))?;
        Ok(token)
    }

    async fn controller_api_info_for_model(
        &self,
        model_uuid: String,
    ) -> Result<ApiInfo> {
        self.stub
            .record(Call::ControllerApiInfoForModel(model_uuid.clone()))?;
        self.state
            .lock()
            .api_info
            .get(&model_uuid)
            .cloned()
            .ok_or_else(|| FacadeError::NotFound(format!("controller info for model {model_uuid}")).into())
    }

    async fn consume_remote_relation_change(
        &self,
        event: RemoteRelationChangeEvent,
    ) -> Result<()> {
        self.stub.record(Call::ConsumeRemoteRelationChange(event))
    }
}

#[derive(Default)]
struct RemoteState {
    relation_units_sinks: HashMap<String, WatcherSink<RelationUnitsChange>>,
    status_sinks: HashMap<String, WatcherSink<Vec<RelationStatusChange>>>,
    facades_built: Vec<ApiInfo>,
}

/// Offering model double.
pub struct FakeRemoteFacade {
    stub: Arc<Stub>,
    state: Mutex<RemoteState>,
}

impl FakeRemoteFacade {
    pub fn new(stub: Arc<Stub>) -> Arc<Self> {
        Arc::new(Self {
            stub,
            state: Mutex::new(RemoteState::default()),
        })
    }

    /// Factory handing out this facade and remembering the connection info
    /// of every request.
    pub fn factory(self: &Arc<Self>) -> NewRemoteFacadeFn {
        let facade = self.clone();
        Arc::new(move |info: &ApiInfo| {
            facade.state.lock().facades_built.push(info.clone());
            Ok(facade.clone() as Arc<dyn RemoteRelationsFacade>)
        })
    }

    pub fn facades_built(&self) -> Vec<ApiInfo> {
        self.state.lock().facades_built.clone()
    }

    pub fn relation_units_watcher(
        &self,
        relation_token: &str,
    ) -> WatcherSink<RelationUnitsChange> {
        self.state
            .lock()
            .relation_units_sinks
            .get(relation_token)
            .cloned()
            .unwrap_or_else(|| panic!("no remote relation units watcher for {relation_token}"))
    }

    pub fn relation_status_watcher(
        &self,
        relation_token: &str,
    ) -> WatcherSink<Vec<RelationStatusChange>> {
        self.state
            .lock()
            .status_sinks
            .get(relation_token)
            .cloned()
            .unwrap_or_else(|| panic!("no remote status watcher for {relation_token}"))
    }

    /// Ends the remote status stream of `relation_token` with `error`.
    pub fn fail_relation_status_watcher(
        &self,
        relation_token: &str,
        error: Error,
    ) {
        if let Some(sink) = self.state.lock().status_sinks.remove(relation_token) {
            sink.fail(error);
        }
    }
}

#[async_trait]
impl RemoteRelationsFacade for FakeRemoteFacade {
    async fn register_remote_relations(
        &self,
        relations: Vec<RegisterRemoteRelationArg>,
    ) -> Result<Vec<FacadeResult<RemoteRelationDetails>>> {
        self.stub
            .record(Call::RegisterRemoteRelations(relations.clone()))?;
        Ok(relations
            .iter()
            .map(|arg| {
                Ok(RemoteRelationDetails {
                    token: format!("token-{}", arg.offer_uuid),
                    macaroon: Macaroon::new("apimac", ""),
                })
            })
            .collect())
    }

    async fn watch_relation_units(
        &self,
        relation_token: String,
        macaroons: Vec<Macaroon>,
    ) -> Result<Watcher<RelationUnitsChange>> {
        self.stub
            .record(Call::WatchRelationUnits(relation_token.clone(), macaroons))?;
        let (sink, watcher) = watcher::channel("remote relation units", FAKE_WATCHER_CAPACITY);
        self.state.lock().relation_units_sinks.insert(relation_token, sink);
        Ok(watcher)
    }

    async fn watch_relation_suspended_status(
        &self,
        relation_token: String,
        macaroons: Vec<Macaroon>,
    ) -> Result<Watcher<Vec<RelationStatusChange>>> {
        self.stub
            .record(Call::WatchRelationSuspendedStatus(relation_token.clone(), macaroons))?;
        let (sink, watcher) = watcher::channel("remote relation status", FAKE_WATCHER_CAPACITY);
        self.state.lock().status_sinks.insert(relation_token, sink);
        Ok(watcher)
    }

    async fn publish_relation_change(
        &self,
        event: RemoteRelationChangeEvent,
    ) -> Result<()> {
        self.stub.record(Call::PublishRelationChange(event))
    }

    async fn relation_unit_settings(
        &self,
        units: Vec<RemoteRelationUnit>,
    ) -> Result<Vec<FacadeResult<Settings>>> {
        let count = units.len();
        self.stub.record(Call::RemoteRelationUnitSettings(units))?;
        Ok((0..count).map(|_| Ok(fake_settings())).collect())
    }

    async fn close(&self) -> Result<()> {
        self.stub.record(Call::Close)
    }
}
