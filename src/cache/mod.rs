//! Content-addressable artifact cache.
//!
//! Expensive derived artifacts (summaries, generated queries, rendered sections)
//! are stored under keys of the form `category:contentHash[:discriminator...]`
//! with a TTL. Entries live in the durable `cache_entries` table; when that is
//! unreachable the cache keeps working from process memory and reports itself
//! as degraded through [`CacheStats::fallback_active`].
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! durable = true
//! default_ttl_seconds = 31536000
//! sweep_interval_seconds = 3600
//! key_marker = "discriminator"
//! ```

mod config;
mod keys;
mod lock;
mod memory;
mod store;
mod sweeper;

pub use config::{CacheConfig, MIN_TTL};
pub use keys::{
    CacheKey, DEFAULT_KEY_MARKER, KeyCodec, KeyError, MAX_CONTENT_HASH_LEN, ParsedKey,
    canonical_json, content_hash,
};
pub use memory::FallbackStore;
pub use store::{ArtifactCache, CacheStats};
pub use sweeper::spawn_sweeper;
