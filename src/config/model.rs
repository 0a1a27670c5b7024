use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ModelConfig {
    /// UUID of the local model. Sent to remote models as the source model
    /// tag when registering relations.
    #[serde(default)]
    pub uuid: String,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.uuid.trim().is_empty() {
            return Err(Error::InvalidConfig("model.uuid must not be empty".into()));
        }
        Ok(())
    }
}
