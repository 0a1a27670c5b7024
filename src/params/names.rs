use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Entity tags in the canonical string form the facades expect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    Application(String),
    Relation(String),
    Unit(String),
    Model(String),
}

impl Tag {
    pub fn application(name: impl Into<String>) -> Self {
        Tag::Application(name.into())
    }

    pub fn relation(key: impl Into<String>) -> Self {
        Tag::Relation(key.into())
    }

    pub fn unit(name: impl Into<String>) -> Self {
        Tag::Unit(name.into())
    }

    pub fn model(uuid: impl Into<String>) -> Self {
        Tag::Model(uuid.into())
    }

    /// The bare identifier, e.g. `db2:db django:db` for a relation.
    pub fn id(&self) -> &str {
        match self {
            Tag::Application(id) | Tag::Relation(id) | Tag::Unit(id) | Tag::Model(id) => id,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Tag::Application(name) => write!(f, "application-{name}"),
            Tag::Relation(key) => write!(f, "relation-{}", key.replace(':', ".").replace(' ', "#")),
            Tag::Unit(name) => write!(f, "unit-{}", name.replace('/', "-")),
            Tag::Model(uuid) => write!(f, "model-{uuid}"),
        }
    }
}

/// Numeric id of a unit, taken from the ordinal after the last `/`.
pub fn unit_id(unit_name: &str) -> Result<u32> {
    let (application, ordinal) = unit_name
        .rsplit_once('/')
        .ok_or_else(|| Error::InvalidUnitName(unit_name.to_string()))?;
    if application.is_empty() {
        return Err(Error::InvalidUnitName(unit_name.to_string()));
    }
    ordinal
        .parse::<u32>()
        .map_err(|_| Error::InvalidUnitName(unit_name.to_string()))
}
