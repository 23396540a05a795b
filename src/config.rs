//! Configuration options for the volume cache.

use std::env;

/// How a caller expects to traverse the volume.
///
/// Consulted only when no explicit block shape is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPattern {
    /// Scattered voxel access; small cubic blocks on every dimension.
    Random,

    /// Sequential scans of contiguous slices; blocks of one full slice
    /// (thickness 1 along all but the last two dimensions).
    SequentialSlice,
}

/// Configuration options for creating a cached volume.
///
/// An explicit value passed into every volume constructor; there is no
/// process-wide mutable default.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Byte budget for one cache instance.
    /// Default: 80,000,000
    pub max_cache_bytes: usize,

    /// Volume size above which callers should cache rather than load
    /// the whole volume into memory. Not consulted by the cache itself.
    /// Default: 80,000,000
    pub cache_threshold_bytes: usize,

    /// Explicit per-dimension block shape. Values <= 0 mean "the full
    /// extent of that dimension" (not blocked along that axis).
    /// When set, the access pattern hint is ignored.
    /// Default: None
    pub block_sizes: Option<Vec<i64>>,

    /// Uniform block size applied to every dimension under the
    /// `Random` access pattern.
    /// Default: 8
    pub default_block_size: usize,

    /// Block-shape derivation strategy when no explicit shape is set.
    /// Default: AccessPattern::Random
    pub access_pattern: AccessPattern,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_cache_bytes: 80_000_000,
            cache_threshold_bytes: 80_000_000,
            block_sizes: None,
            default_block_size: 8,
            access_pattern: AccessPattern::Random,
        }
    }
}

impl CacheOptions {
    /// Creates a new CacheOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options from defaults overridden by environment settings.
    ///
    /// Recognized variables: `VOXSTORE_CACHE_BYTES`,
    /// `VOXSTORE_CACHE_THRESHOLD`, `VOXSTORE_BLOCK_SIZE`, and
    /// `VOXSTORE_ACCESS_PATTERN` (`random` or `slice`). Values that fail
    /// to parse are logged and ignored. The environment is read once,
    /// here; the returned value carries the settings from then on.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Some(bytes) = read_env_usize("VOXSTORE_CACHE_BYTES") {
            options.max_cache_bytes = bytes;
        }
        if let Some(bytes) = read_env_usize("VOXSTORE_CACHE_THRESHOLD") {
            options.cache_threshold_bytes = bytes;
        }
        if let Some(size) = read_env_usize("VOXSTORE_BLOCK_SIZE") {
            if size >= 1 {
                options.default_block_size = size;
            } else {
                log::warn!("VOXSTORE_BLOCK_SIZE must be >= 1, ignoring");
            }
        }
        if let Ok(value) = env::var("VOXSTORE_ACCESS_PATTERN") {
            match value.as_str() {
                "random" => options.access_pattern = AccessPattern::Random,
                "slice" => options.access_pattern = AccessPattern::SequentialSlice,
                other => {
                    log::warn!("Unknown VOXSTORE_ACCESS_PATTERN {:?}, ignoring", other);
                }
            }
        }

        options
    }

    /// Sets the cache byte budget.
    pub fn max_cache_bytes(mut self, bytes: usize) -> Self {
        self.max_cache_bytes = bytes;
        self
    }

    /// Sets the caching threshold consulted by `should_cache`.
    pub fn cache_threshold_bytes(mut self, bytes: usize) -> Self {
        self.cache_threshold_bytes = bytes;
        self
    }

    /// Sets an explicit per-dimension block shape.
    pub fn block_sizes(mut self, sizes: &[i64]) -> Self {
        self.block_sizes = Some(sizes.to_vec());
        self
    }

    /// Sets the uniform block size used under the `Random` pattern.
    pub fn default_block_size(mut self, size: usize) -> Self {
        self.default_block_size = size;
        self
    }

    /// Sets the access pattern hint.
    pub fn access_pattern(mut self, pattern: AccessPattern) -> Self {
        self.access_pattern = pattern;
        self
    }

    /// Whether a volume of the given total byte size should be cached
    /// rather than held entirely in memory.
    ///
    /// This is a decision for the layer above the cache; the cache
    /// itself behaves identically either way.
    pub fn should_cache(&self, volume_bytes: usize) -> bool {
        volume_bytes > self.cache_threshold_bytes
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.default_block_size == 0 {
            return Err(crate::Error::invalid_argument("default_block_size must be > 0"));
        }
        if let Some(sizes) = &self.block_sizes {
            if sizes.is_empty() {
                return Err(crate::Error::invalid_argument("block_sizes must not be empty"));
            }
        }
        Ok(())
    }
}

fn read_env_usize(name: &str) -> Option<usize> {
    let value = env::var(name).ok()?;
    match value.parse::<usize>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("{} is not a valid number: {:?}, ignoring", name, value);
            None
        }
    }
}
