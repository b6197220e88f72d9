//! Application services layer.

pub mod error;
pub mod repos;
pub mod versions;
