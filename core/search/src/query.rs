//! Search options and query normalization.

use lectio_common::{canon, Error, Result, Testament, TranslationId};

/// Default number of results returned.
pub const DEFAULT_LIMIT: usize = 50;

/// Queries shorter than this (in characters, after trimming) match nothing.
pub const MIN_QUERY_CHARS: usize = 2;

/// Restricts which books are scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookFilter {
    Testament(Testament),
    Book(String),
    /// The book named by [`SearchOptions::current_book`].
    CurrentBook,
}

/// Options for one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Translations to search. Empty means every resident translation.
    pub translation_ids: Vec<TranslationId>,
    pub book_filter: Option<BookFilter>,
    /// Book the reader is currently showing.
    pub current_book: Option<String>,
    pub limit: usize,
    pub case_sensitive: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            translation_ids: Vec::new(),
            book_filter: None,
            current_book: None,
            limit: DEFAULT_LIMIT,
            case_sensitive: false,
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translation(mut self, id: TranslationId) -> Self {
        self.translation_ids.push(id);
        self
    }

    pub fn with_translations(mut self, ids: impl IntoIterator<Item = TranslationId>) -> Self {
        self.translation_ids.extend(ids);
        self
    }

    pub fn with_book_filter(mut self, filter: BookFilter) -> Self {
        self.book_filter = Some(filter);
        self
    }

    pub fn with_current_book(mut self, book: impl Into<String>) -> Self {
        self.current_book = Some(book.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Resolve the book filter into a matcher.
    ///
    /// # Errors
    /// - `InvalidQuery` if `limit` is zero
    /// - `InvalidQuery` if `CurrentBook` is requested without a current book
    pub(crate) fn book_matcher(&self) -> Result<BookMatcher> {
        if self.limit == 0 {
            return Err(Error::InvalidQuery("limit must be at least 1".to_string()));
        }

        Ok(match &self.book_filter {
            None => BookMatcher::All,
            Some(BookFilter::Testament(testament)) => BookMatcher::Testament(*testament),
            Some(BookFilter::Book(book)) => BookMatcher::Book(book.clone()),
            Some(BookFilter::CurrentBook) => match &self.current_book {
                Some(book) if !book.trim().is_empty() => BookMatcher::Book(book.clone()),
                _ => {
                    return Err(Error::InvalidQuery(
                        "current-book filter requires a current book".to_string(),
                    ))
                }
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BookMatcher {
    All,
    Testament(Testament),
    Book(String),
}

impl BookMatcher {
    pub(crate) fn matches(&self, book: &str) -> bool {
        match self {
            Self::All => true,
            Self::Testament(testament) => canon::testament(book) == Some(*testament),
            Self::Book(wanted) => canon::same_book(book, wanted),
        }
    }
}

/// Normalize text for matching.
pub fn normalize(text: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        text.to_string()
    } else {
        fold_sigma(&text.to_lowercase())
    }
}

/// Final sigma depends on word position when lowercasing; fold it to `σ`
/// so a word matches however it was cased. Both forms are two bytes.
fn fold_sigma(lower: &str) -> String {
    lower.replace('ς', "σ")
}

/// Normalize a query. `None` if it is too short to search for.
pub fn normalize_query(query: &str, case_sensitive: bool) -> Option<String> {
    let trimmed = query.trim();
    if trimmed.chars().count() < MIN_QUERY_CHARS {
        return None;
    }
    Some(normalize(trimmed, case_sensitive))
}
