//! Domain layer types and invariants.

pub mod configuration;
pub mod entities;
pub mod types;
pub mod versions;
