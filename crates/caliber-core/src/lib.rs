//! caliber-core - Offline sync core for CaliberVault
//!
//! This crate contains the durable mutation queue, local entity cache, retry
//! policy, conflict resolution, and the drain engine shared by every
//! CaliberVault client.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod util;

pub use error::{Error, Result};
pub use models::{EntityKey, MutationId, MutationKind, PendingMutation};
