//! Shared types for the plaque viewer: document model, configuration,
//! platform paths, the local cache and the runtime flags.

pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod platform;
pub mod state;
