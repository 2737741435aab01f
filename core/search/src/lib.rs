//! Verse search for Lectio.
//!
//! A linear scan over resident translations with simple relevance scoring
//! and highlight spans. There is no persisted index.

pub mod engine;
pub mod highlight;
pub mod query;

pub use engine::{score, search_translations, SearchEngine, SearchResult, MAX_SCORE};
pub use highlight::highlight_spans;
pub use query::{normalize_query, BookFilter, SearchOptions, DEFAULT_LIMIT, MIN_QUERY_CHARS};
