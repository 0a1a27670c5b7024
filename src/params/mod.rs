//! Wire-level types exchanged with the local and remote relations facades.
//!
//! `RemoteRelationChangeEvent` is the contract between the two models: both
//! facades must carry it unchanged, which is why every type here derives
//! `Serialize`/`Deserialize` and compares structurally.

mod codec;
mod names;
pub use codec::*;
pub use names::*;


use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Relation unit settings, ordered by key so events encode deterministically.
pub type Settings = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    #[default]
    Alive,
    Dying,
    Dead,
}

impl Life {
    pub fn is_alive(&self) -> bool {
        matches!(self, Life::Alive)
    }
}

impl fmt::Display for Life {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Life::Alive => "alive",
            Life::Dying => "dying",
            Life::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Opaque delegated credential. Never inspected here, only stored per
/// relation and attached to outgoing calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Macaroon {
    pub id: String,
    pub location: String,
}

impl Macaroon {
    pub fn new(
        id: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
        }
    }
}

/// An application offered by another model and consumed in this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteApplication {
    pub name: String,
    pub offer_url: String,
    pub offer_uuid: String,
    /// UUID of the model hosting the offer.
    pub model_uuid: String,
    pub life: Life,
    /// Set on the offering side's proxy for a consumer. Such applications are
    /// driven by the consuming model and ignored here.
    pub registered: bool,
    /// Credential obtained when the offer was consumed.
    pub macaroon: Macaroon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub name: String,
    pub role: String,
    pub interface: String,
}

/// Local view of a relation against a remote application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRelation {
    pub id: i64,
    pub key: String,
    pub life: Life,
    pub suspended: bool,
    /// The local application on the other end of the relation.
    pub application_name: String,
    pub endpoint: RemoteEndpoint,
    pub remote_endpoint_name: String,
    pub source_model_uuid: String,
}

/// Connection details for a remote model's controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiInfo {
    pub addrs: Vec<String>,
    pub ca_cert: String,
    pub model_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRemoteRelationArg {
    pub application_token: String,
    pub source_model_tag: String,
    pub relation_token: String,
    pub remote_endpoint: RemoteEndpoint,
    pub offer_uuid: String,
    pub local_endpoint_name: String,
    pub macaroons: Vec<Macaroon>,
}

/// Result of registering a relation with the offering model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRelationDetails {
    /// Token the offering model assigned to the offered application.
    pub token: String,
    pub macaroon: Macaroon,
}

/// Reference to one unit's settings in a local relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationUnit {
    pub relation: String,
    pub unit: String,
}

/// Reference to one unit's settings in a relation owned by the remote model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRelationUnit {
    pub relation_token: String,
    pub unit: String,
    pub macaroons: Vec<Macaroon>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UnitSettings {
    pub version: i64,
}

/// One batch from a relation units watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RelationUnitsChange {
    pub changed: BTreeMap<String, UnitSettings>,
    pub departed: Vec<String>,
}

impl RelationUnitsChange {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.departed.is_empty()
    }
}

/// One entry from a relation status watch. `suspended` is `None` when the
/// producer expressed no opinion about suspension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationStatusChange {
    pub key: String,
    pub life: Life,
    pub suspended: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRelationUnitChange {
    pub unit_id: u32,
    pub settings: Settings,
}

/// Delta of one relation's state, relayed between the two models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RemoteRelationChangeEvent {
    pub relation_token: String,
    pub application_token: String,
    pub life: Option<Life>,
    /// `None` means unspecified; `Some(false)` is an explicit unsuspend.
    pub suspended: Option<bool>,
    pub changed_units: Vec<RemoteRelationUnitChange>,
    pub departed_units: Vec<u32>,
    pub macaroons: Vec<Macaroon>,
}
