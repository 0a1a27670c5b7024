//! Cross-Model Relation Error Hierarchy
//!
//! Defines the error types surfaced by the remote relations worker tree,
//! categorized by the layer that produced them and by how far a failure is
//! allowed to propagate (relation, application worker, coordinator).

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Failures reported by a local or remote relations facade
    #[error(transparent)]
    Facade(#[from] FacadeError),

    /// Failures relaying a change for one relation. These are fatal to the
    /// owning application worker only.
    #[error(transparent)]
    Relation(#[from] RelationError),

    /// Watch stream failures
    #[error(transparent)]
    Watcher(#[from] WatcherError),

    /// Event encoding failures
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("Invalid unit name: {0}")]
    InvalidUnitName(String),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// The worker was asked to stop. Not a failure.
    #[error("worker stopped")]
    Exit,

    /// Unrecoverable failures requiring the worker tree to stop
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FacadeError {
    /// The entity no longer exists on the facade's side
    #[error("{0} not found")]
    NotFound(String),

    /// The call reached the facade but failed
    #[error("{0}")]
    Rpc(String),

    /// The facade answered with a result that does not match the request
    #[error("unexpected facade response: {0}")]
    Unexpected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RelationError {
    #[error("publishing relation change {relation_key} to remote model {model_uuid}: {source}")]
    Publish {
        relation_key: String,
        model_uuid: String,
        source: Box<Error>,
    },

    #[error("consuming relation change {relation_key} from remote model {model_uuid}: {source}")]
    Consume {
        relation_key: String,
        model_uuid: String,
        source: Box<Error>,
    },

    #[error("watching relation {relation_key} (remote model {model_uuid}): {source}")]
    Watch {
        relation_key: String,
        model_uuid: String,
        source: Box<Error>,
    },

    #[error("fetching unit settings for relation {relation_key} (remote model {model_uuid}): {source}")]
    Settings {
        relation_key: String,
        model_uuid: String,
        source: Box<Error>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("{name} watcher closed unexpectedly")]
    Closed { name: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),
}

impl Error {
    /// True for a voluntary stop.
    pub fn is_exit(&self) -> bool {
        matches!(self, Error::Exit)
    }

    /// True when the facade reported the entity as gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Facade(FacadeError::NotFound(_)))
    }

    /// Failures that kill a single remote application worker and are
    /// recovered by respawning it on the next applications watch tick.
    pub fn is_application_scoped(&self) -> bool {
        matches!(self, Error::Relation(_))
    }
}

// ============== Conversion Implementations ============== //
impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(SerializationError::Bincode(e))
    }
}
