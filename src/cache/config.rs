//! Cache configuration.
//!
//! Runtime view of the `[cache]` settings: TTL defaults, the durable backend
//! and the maintenance sweep.

use std::time::Duration;

use super::keys::DEFAULT_KEY_MARKER;

/// One year.
const DEFAULT_TTL_SECS: u64 = 365 * 24 * 60 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
/// Shortest TTL accepted; keeps `expires_at` strictly after `created_at`.
pub const MIN_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Use the durable backend; when false every entry lives in process memory.
    pub durable: bool,
    /// TTL applied when `set` is called without one.
    pub default_ttl_secs: u64,
    /// Cadence of the expired-entry sweep.
    pub sweep_interval_secs: u64,
    /// Literal prefix of the `<marker>_<n>` discriminator segment.
    pub key_marker: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            durable: true,
            default_ttl_secs: DEFAULT_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            key_marker: DEFAULT_KEY_MARKER.to_string(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            durable: settings.durable,
            default_ttl_secs: settings.default_ttl.as_secs(),
            sweep_interval_secs: settings.sweep_interval.as_secs(),
            key_marker: settings.key_marker.clone(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs).max(MIN_TTL)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Resolve a caller TTL, falling back to the default and clamping to `MIN_TTL`.
    pub fn resolve_ttl(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or_else(|| self.default_ttl()).max(MIN_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.durable);
        assert_eq!(config.default_ttl(), Duration::from_secs(31_536_000));
        assert_eq!(config.sweep_interval(), Duration::from_secs(3600));
        assert_eq!(config.key_marker, "discriminator");
    }

    #[test]
    fn resolve_ttl_prefers_caller_value() {
        let config = CacheConfig::default();
        assert_eq!(
            config.resolve_ttl(Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(config.resolve_ttl(None), config.default_ttl());
    }

    #[test]
    fn zero_ttl_clamps_to_minimum() {
        let config = CacheConfig {
            default_ttl_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.resolve_ttl(Some(Duration::ZERO)), MIN_TTL);
        assert_eq!(config.resolve_ttl(None), MIN_TTL);
    }

    #[test]
    fn zero_sweep_interval_clamps_to_one_second() {
        let config = CacheConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }
}
