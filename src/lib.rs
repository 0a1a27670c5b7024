mod config;
mod errors;
pub mod facade;
pub mod params;
mod remoterelations;
pub mod watcher;
pub mod worker;

pub use config::*;
pub use errors::*;
pub use remoterelations::*;

//-----------------------------------------------------------
// Test utils
