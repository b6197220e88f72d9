//! Entity version history and a content-addressed artifact cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
