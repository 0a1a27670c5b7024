use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Tuning for watch streams and the channels leaf watchers forward into.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct WatcherConfig {
    /// Number of change batches buffered per stream before the producer
    /// waits for the consuming worker.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "watcher.channel_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_channel_capacity() -> usize {
    64
}
