//! Cross-model relation synchronization.
//!
//! The worker tree has three levels: the coordinator tracks remote
//! applications, one application worker per remote application tracks its
//! relations, and leaf watchers relay unit and status changes for each
//! relation. Parents own their children and stop them before reporting
//! stopped themselves.

mod application_worker;
mod coordinator;
mod relation_units;
mod translate;

pub use coordinator::*;
