//! Array cache configuration.
//!
//! Read once per process from the environment by [`CacheConfig::global`],
//! or built explicitly and passed to [`ArrayCache::new`](crate::ArrayCache::new).

use std::sync::OnceLock;

use tessera_core::{MemError, MemoryKind};

/// Environment variable toggling the cache (`true`/`false`, `1`/`0`).
pub const ENV_CACHE_ENABLE: &str = "TESSERA_CACHE_ENABLE";
/// Environment variable for [`CacheConfig::max_mem_fraction`].
pub const ENV_MEM_FRACTION: &str = "TESSERA_CACHE_MEM_FRACTION";
/// Environment variable for [`CacheConfig::small_array_threshold`].
pub const ENV_SMALL_ARRAY_THRESHOLD: &str = "TESSERA_SMALL_ARRAY_THRESHOLD";
/// Environment variable for [`CacheConfig::large_array_max_multiple`].
pub const ENV_LARGE_ARRAY_MAX_MULTIPLE: &str = "TESSERA_LARGE_ARRAY_MAX_MULTIPLE";
/// Environment variable for [`CacheConfig::total_memory_bytes`].
pub const ENV_TOTAL_MEMORY_BYTES: &str = "TESSERA_TOTAL_MEMORY_BYTES";

static GLOBAL: OnceLock<CacheConfig> = OnceLock::new();

/// Configuration for an [`ArrayCache`](crate::ArrayCache).
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    /// Whether released buffers are retained at all.
    ///
    /// Default: `true`.
    pub enabled: bool,

    /// Fraction of total memory the cache may hold.
    ///
    /// Default: 0.25. Must be in `[0, 1]`.
    pub max_mem_fraction: f64,

    /// Buffers of this many bytes or fewer are never cached.
    ///
    /// Default: 1024.
    pub small_array_threshold: usize,

    /// A buffer is only cached in a slot if its capacity is at most this
    /// multiple of the slot's byte size.
    ///
    /// Default: 2.0. Must be at least 1.
    pub large_array_max_multiple: f64,

    /// Total memory the budget is computed from. `None` asks the memory
    /// manager (device memory if a device is attached, host memory
    /// otherwise).
    pub total_memory_bytes: Option<usize>,

    /// Kind of fresh memory the cache allocates on a miss.
    ///
    /// Default: [`MemoryKind::Host`].
    pub memory_kind: MemoryKind,
}

impl CacheConfig {
    /// Default budget fraction.
    pub const DEFAULT_MAX_MEM_FRACTION: f64 = 0.25;

    /// Default small-array threshold in bytes.
    pub const DEFAULT_SMALL_ARRAY_THRESHOLD: usize = 1024;

    /// Default large-array multiple.
    pub const DEFAULT_LARGE_ARRAY_MAX_MULTIPLE: f64 = 2.0;

    /// Build a configuration from the environment.
    ///
    /// Unset variables keep their defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self, MemError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MemError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_CACHE_ENABLE) {
            config.enabled = parse_bool(ENV_CACHE_ENABLE, &v)?;
        }
        if let Some(v) = lookup(ENV_MEM_FRACTION) {
            config.max_mem_fraction = parse(ENV_MEM_FRACTION, &v)?;
        }
        if let Some(v) = lookup(ENV_SMALL_ARRAY_THRESHOLD) {
            config.small_array_threshold = parse(ENV_SMALL_ARRAY_THRESHOLD, &v)?;
        }
        if let Some(v) = lookup(ENV_LARGE_ARRAY_MAX_MULTIPLE) {
            config.large_array_max_multiple = parse(ENV_LARGE_ARRAY_MAX_MULTIPLE, &v)?;
        }
        if let Some(v) = lookup(ENV_TOTAL_MEMORY_BYTES) {
            config.total_memory_bytes = Some(parse(ENV_TOTAL_MEMORY_BYTES, &v)?);
        }
        config.validate()?;
        Ok(config)
    }

    /// The process-wide configuration, read from the environment on first
    /// use. Falls back to defaults (with a warning) if the environment is
    /// malformed.
    pub fn global() -> &'static CacheConfig {
        GLOBAL.get_or_init(|| match Self::from_env() {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed cache configuration");
                Self::default()
            }
        })
    }

    /// Check every field for consistency.
    pub fn validate(&self) -> Result<(), MemError> {
        if !(0.0..=1.0).contains(&self.max_mem_fraction) {
            return Err(MemError::InvalidConfig {
                reason: format!(
                    "max_mem_fraction must be in [0, 1], got {}",
                    self.max_mem_fraction
                ),
            });
        }
        if !self.large_array_max_multiple.is_finite() || self.large_array_max_multiple < 1.0 {
            return Err(MemError::InvalidConfig {
                reason: format!(
                    "large_array_max_multiple must be >= 1, got {}",
                    self.large_array_max_multiple
                ),
            });
        }
        Ok(())
    }

    /// Cache budget in bytes for a machine with `total_bytes` of memory.
    pub fn max_cache_bytes(&self, total_bytes: usize) -> usize {
        (self.max_mem_fraction * total_bytes as f64).round() as usize
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_mem_fraction: Self::DEFAULT_MAX_MEM_FRACTION,
            small_array_threshold: Self::DEFAULT_SMALL_ARRAY_THRESHOLD,
            large_array_max_multiple: Self::DEFAULT_LARGE_ARRAY_MAX_MULTIPLE,
            total_memory_bytes: None,
            memory_kind: MemoryKind::Host,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, MemError> {
    value.trim().parse().map_err(|_| MemError::InvalidConfig {
        reason: format!("{key}: cannot parse {value:?}"),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, MemError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MemError::InvalidConfig {
            reason: format!("{key}: expected a boolean, got {value:?}"),
        }),
    }
}
