//! Cache tuning knobs, consumed from the mount configuration.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Default time-to-live for cached attributes (120 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default cap on cached entries. Caching more means more resident memory;
/// past the cap the cache degrades to a pass-through for new paths.
pub const DEFAULT_MAX_ENTRIES: usize = 5_000_000;

/// Floor for the sweeper interval, so a zero timeout never produces a
/// zero-interval timer.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Configuration for the attribute cache stage.
///
/// Deserializable from the mount's config file; every field has a default so
/// an empty section works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheSettings {
    /// How long a cached entry may be served without a refetch. Zero
    /// disables serving from cache entirely; the sweeper still runs at
    /// [`MIN_SWEEP_INTERVAL`].
    #[serde(rename = "timeout-sec", deserialize_with = "seconds")]
    pub timeout: Duration,

    /// Maximum number of cached entries.
    pub max_entries: usize,

    /// Whether directory existence is tracked at all. Required for the
    /// cloud-presence bookkeeping that keeps empty directories listable.
    pub track_dirs: bool,

    /// Whether directory-listing pages are cached and attributes returned by
    /// listings are inserted.
    pub cache_on_list: bool,

    /// Whether symlink handling may skip metadata-driven shortcuts, letting
    /// `get_attr` serve entries whose metadata was never fetched.
    pub no_symlinks: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_entries: DEFAULT_MAX_ENTRIES,
            track_dirs: true,
            cache_on_list: true,
            no_symlinks: false,
        }
    }
}

impl CacheSettings {
    /// Sets the entry time-to-live.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of cached entries.
    #[must_use]
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Enables or disables directory tracking.
    #[must_use]
    pub fn track_dirs(mut self, track: bool) -> Self {
        self.track_dirs = track;
        self
    }

    /// Enables or disables listing-page caching.
    #[must_use]
    pub fn cache_on_list(mut self, cache: bool) -> Self {
        self.cache_on_list = cache;
        self
    }

    /// Enables or disables the symlink metadata shortcut.
    #[must_use]
    pub fn no_symlinks(mut self, no_symlinks: bool) -> Self {
        self.no_symlinks = no_symlinks;
        self
    }

    /// The sweeper wake-up interval: the timeout clamped to
    /// [`MIN_SWEEP_INTERVAL`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.timeout.max(MIN_SWEEP_INTERVAL)
    }
}
