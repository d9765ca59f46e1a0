//! # Cache Module
//!
//! Short-lived in-memory caches used to bound reads against slower
//! collaborators.
//!
//! ## Cache Types
//!
//! - **Chat settings**: per-chat music settings, ~30s TTL, invalidated on
//!   every successful write (see [`crate::settings::SettingsCache`])
//! - **Extraction results**: yt-dlp metadata per (query, video) pair, ~120s
//! - **Stream locators**: resolved direct media URLs per (url, video), ~120s
//!
//! All caches share the [`TtlCache`] implementation: a [`dashmap::DashMap`]
//! keyed store where each entry carries its own expiry instant. Expiry is
//! checked lazily on read; [`TtlCache::cleanup_expired`] sweeps the rest.
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Duration;
//! use tgvc_music::cache::TtlCache;
//!
//! let cache: TtlCache<String, u64> = TtlCache::new(Duration::from_secs(30));
//! cache.insert("plays".to_string(), 3);
//! assert_eq!(cache.get(&"plays".to_string()), Some(3));
//! ```

pub mod ttl_cache;

pub use ttl_cache::TtlCache;
