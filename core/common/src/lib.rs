//! Common types shared across the Lectio crates.
//!
//! This module provides the scripture data model (translations, verses,
//! canonical book order), the shared error type and the retry policy used
//! for network work.

pub mod canon;
pub mod error;
pub mod retry;
pub mod types;

pub use canon::Testament;
pub use error::{Error, Result};
pub use retry::{RetryConfig, RetryExecutor};
pub use types::{Direction, Translation, TranslationId, Verse};
