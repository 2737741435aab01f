//! Translation content for Lectio.
//!
//! This crate loads translation documents on demand and keeps them
//! resident in a [`TranslationCache`]. Loads are coalesced per translation
//! and failures are never cached.

pub mod cache;
pub mod catalog;
pub mod data;
pub mod loader;
pub mod protocol;

pub use cache::{CacheConfig, CacheStats, TranslationCache};
pub use catalog::Catalog;
pub use data::{Chapters, TranslationData};
pub use loader::{DirLoader, HttpLoader, TranslationLoader};
pub use protocol::{CacheRequest, CacheResponse};
