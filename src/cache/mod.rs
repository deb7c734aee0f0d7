//! Response cache for catalogue reads.
//!
//! Read handlers serve serialized payloads through [`ResponseCache`]; write
//! services publish an [`EventKind`] through [`CacheTrigger`] after commit.
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_entries = 512
//! product_list_ttl_secs = 300
//! # ... see config.rs for all options
//! ```

mod config;
pub mod deps;
mod events;
mod keys;
mod lock;
mod registry;
mod store;
mod trigger;

pub use config::CacheConfig;
pub use events::EventKind;
pub use keys::{CacheKey, EntityKey, KeyFamily};
pub use store::{CacheStats, Epoch, ResponseCache};
pub use trigger::CacheTrigger;
