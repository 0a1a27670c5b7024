//! Translation between watch batches and `RemoteRelationChangeEvent`s.
//!
//! Unit ordering never depends on map iteration: changed units are sorted by
//! their numeric id and departed ids ascend, so the same batch always yields
//! the same event.

use tracing::warn;

use crate::facade::FacadeResult;
use crate::facade::LocalRelationsFacade;
use crate::facade::RemoteRelationsFacade;
use crate::params::unit_id;
use crate::params::Life;
use crate::params::Macaroon;
use crate::params::RelationStatusChange;
use crate::params::RelationUnit;
use crate::params::RelationUnitsChange;
use crate::params::RemoteRelationChangeEvent;
use crate::params::RemoteRelationUnit;
use crate::params::RemoteRelationUnitChange;
use crate::params::Settings;
use crate::params::Tag;
use crate::FacadeError;
use crate::Result;

/// Changed units that did not also depart in the same batch, as
/// `(unit id, unit name)` ordered by id. Units with malformed names are
/// skipped.
pub(crate) fn changed_units(change: &RelationUnitsChange) -> Vec<(u32, String)> {
    let mut units: Vec<(u32, String)> = change
        .changed
        .keys()
        .filter(|name| !change.departed.contains(name))
        .filter_map(|name| match unit_id(name) {
            Ok(id) => Some((id, name.clone())),
            Err(e) => {
                warn!("skipping changed unit: {}", e);
                None
            }
        })
        .collect();
    units.sort();
    units
}

pub(crate) fn departed_unit_ids(change: &RelationUnitsChange) -> Vec<u32> {
    let mut ids: Vec<u32> = change
        .departed
        .iter()
        .filter_map(|name| match unit_id(name) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("skipping departed unit: {}", e);
                None
            }
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Pairs fetched settings with the units they were requested for.
pub(crate) fn unit_changes(
    units: &[(u32, String)],
    settings: Vec<FacadeResult<Settings>>,
) -> Result<Vec<RemoteRelationUnitChange>> {
    if settings.len() != units.len() {
        return Err(FacadeError::Unexpected(format!(
            "expected settings for {} units, got {}",
            units.len(),
            settings.len()
        ))
        .into());
    }
    units
        .iter()
        .zip(settings)
        .map(|((id, _), settings)| {
            Ok(RemoteRelationUnitChange {
                unit_id: *id,
                settings: settings?,
            })
        })
        .collect()
}

/// Fetches settings of local units in one call.
pub(crate) async fn local_unit_changes(
    local: &dyn LocalRelationsFacade,
    relation: &Tag,
    units: &[(u32, String)],
) -> Result<Vec<RemoteRelationUnitChange>> {
    if units.is_empty() {
        return Ok(Vec::new());
    }
    let refs = units
        .iter()
        .map(|(_, name)| RelationUnit {
            relation: relation.to_string(),
            unit: Tag::unit(name.as_str()).to_string(),
        })
        .collect();
    let settings = local.relation_unit_settings(refs).await?;
    unit_changes(units, settings)
}

/// Fetches settings of units in the offering model in one call.
pub(crate) async fn remote_unit_changes(
    remote: &dyn RemoteRelationsFacade,
    relation_token: &str,
    macaroon: &Macaroon,
    units: &[(u32, String)],
) -> Result<Vec<RemoteRelationUnitChange>> {
    if units.is_empty() {
        return Ok(Vec::new());
    }
    let refs = units
        .iter()
        .map(|(_, name)| RemoteRelationUnit {
            relation_token: relation_token.to_string(),
            unit: Tag::unit(name.as_str()).to_string(),
            macaroons: vec![macaroon.clone()],
        })
        .collect();
    let settings = remote.relation_unit_settings(refs).await?;
    unit_changes(units, settings)
}

pub(crate) fn units_change_event(
    application_token: &str,
    relation_token: &str,
    changed_units: Vec<RemoteRelationUnitChange>,
    departed_units: Vec<u32>,
    macaroon: &Macaroon,
) -> RemoteRelationChangeEvent {
    RemoteRelationChangeEvent {
        relation_token: relation_token.to_string(),
        application_token: application_token.to_string(),
        changed_units,
        departed_units,
        macaroons: vec![macaroon.clone()],
        ..Default::default()
    }
}

/// Event announcing that the local side of a relation is going away.
pub(crate) fn dying_event(
    application_token: &str,
    relation_token: &str,
    macaroon: &Macaroon,
) -> RemoteRelationChangeEvent {
    RemoteRelationChangeEvent {
        relation_token: relation_token.to_string(),
        application_token: application_token.to_string(),
        life: Some(Life::Dying),
        macaroons: vec![macaroon.clone()],
        ..Default::default()
    }
}

pub(crate) fn suspended_event(
    application_token: &str,
    relation_token: &str,
    suspended: bool,
    macaroon: &Macaroon,
) -> RemoteRelationChangeEvent {
    RemoteRelationChangeEvent {
        relation_token: relation_token.to_string(),
        application_token: application_token.to_string(),
        life: Some(Life::Alive),
        suspended: Some(suspended),
        macaroons: vec![macaroon.clone()],
        ..Default::default()
    }
}

/// Event relaying a status change reported by the offering model. The
/// suspension opinion is carried through as is.
pub(crate) fn status_change_event(
    application_token: &str,
    relation_token: &str,
    change: &RelationStatusChange,
) -> RemoteRelationChangeEvent {
    RemoteRelationChangeEvent {
        relation_token: relation_token.to_string(),
        application_token: application_token.to_string(),
        life: Some(change.life),
        suspended: change.suspended,
        ..Default::default()
    }
}
