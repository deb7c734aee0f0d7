//! Cache configuration.
//!
//! Controls the response cache via the `[cache]` table of `catalogue.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::keys::{CacheKey, KeyFamily};

const DEFAULT_MAX_ENTRIES: usize = 512;
const DEFAULT_PRODUCT_LIST_TTL_SECS: u64 = 300;
const DEFAULT_PRODUCT_DETAIL_TTL_SECS: u64 = 900;
const DEFAULT_CATEGORY_LIST_TTL_SECS: u64 = 900;
const DEFAULT_TTL_SECS: u64 = 300;

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and populate cached payloads.
    pub enabled: bool,
    /// Maximum number of cached payloads before LRU eviction.
    pub max_entries: usize,
    pub product_list_ttl_secs: u64,
    pub product_detail_ttl_secs: u64,
    pub category_list_ttl_secs: u64,
    /// TTL for every other key family.
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            product_list_ttl_secs: DEFAULT_PRODUCT_LIST_TTL_SECS,
            product_detail_ttl_secs: DEFAULT_PRODUCT_DETAIL_TTL_SECS,
            category_list_ttl_secs: DEFAULT_CATEGORY_LIST_TTL_SECS,
            default_ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_entries: settings.max_entries.get(),
            product_list_ttl_secs: settings.product_list_ttl.as_secs(),
            product_detail_ttl_secs: settings.product_detail_ttl.as_secs(),
            category_list_ttl_secs: settings.category_list_ttl.as_secs(),
            default_ttl_secs: settings.default_ttl.as_secs(),
        }
    }
}

impl CacheConfig {
    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Time-to-live applied when `key` is stored.
    pub fn ttl_for(&self, key: &CacheKey) -> Duration {
        let secs = match key.family() {
            KeyFamily::ProductList => self.product_list_ttl_secs,
            KeyFamily::ProductDetail => self.product_detail_ttl_secs,
            KeyFamily::CategoryList => self.category_list_ttl_secs,
            _ => self.default_ttl_secs,
        };
        Duration::from_secs(secs.max(1))
    }
}
