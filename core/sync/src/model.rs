//! Bookmarks and highlights: the user records kept offline.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::outbox::EntityKind;
use lectio_common::{canon, Error, Result};
use lectio_storage::{BOOKMARKS, HIGHLIGHTS};

/// Collection new bookmarks land in.
pub const DEFAULT_COLLECTION: &str = "default";

/// A record stored locally and mirrored to the server through the outbox.
pub trait SyncRecord: Serialize + DeserializeOwned + Clone + Send + Sync {
    const KIND: EntityKind;
    /// Object store holding records of this kind.
    const STORE: &'static str;

    fn id(&self) -> &str;

    /// # Errors
    /// - `InvalidInput` if a required field is empty or a position is zero
    fn validate(&self) -> Result<()>;
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} cannot be empty", field)));
    }
    Ok(())
}

fn require_position(chapter: u32, verse: u32) -> Result<()> {
    if chapter == 0 || verse == 0 {
        return Err(Error::InvalidInput(format!(
            "chapter and verse start at 1 (got {}:{})",
            chapter, verse
        )));
    }
    Ok(())
}

/// A bookmarked verse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: String,
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub collection: String,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Bookmark a verse in the default collection.
    ///
    /// Book abbreviations resolve to the canonical name.
    pub fn new(book: impl Into<String>, chapter: u32, verse: u32) -> Self {
        let book = canon::resolve_book(&book.into());
        Self {
            id: Self::composite_id(&book, chapter, verse),
            book,
            chapter,
            verse,
            note: None,
            collection: DEFAULT_COLLECTION.to_string(),
            created_at: Utc::now(),
        }
    }

    /// `book-chapter-verse`, the id a verse is bookmarked under.
    pub fn composite_id(book: &str, chapter: u32, verse: u32) -> String {
        format!("{}-{}-{}", canon::resolve_book(book), chapter, verse)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn reference(&self) -> String {
        format!("{} {}:{}", self.book, self.chapter, self.verse)
    }
}

impl SyncRecord for Bookmark {
    const KIND: EntityKind = EntityKind::Bookmark;
    const STORE: &'static str = BOOKMARKS;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<()> {
        require("bookmark id", &self.id)?;
        require("book", &self.book)?;
        require("collection", &self.collection)?;
        require_position(self.chapter, self.verse)
    }
}

/// A highlighted passage of a verse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: String,
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
    pub text: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

impl Highlight {
    /// Highlight with a fresh random id.
    pub fn new(
        book: impl Into<String>,
        chapter: u32,
        verse: u32,
        text: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            book: canon::resolve_book(&book.into()),
            chapter,
            verse,
            text: text.into(),
            color: color.into(),
            created_at: Utc::now(),
        }
    }

    pub fn reference(&self) -> String {
        format!("{} {}:{}", self.book, self.chapter, self.verse)
    }
}

impl SyncRecord for Highlight {
    const KIND: EntityKind = EntityKind::Highlight;
    const STORE: &'static str = HIGHLIGHTS;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<()> {
        require("highlight id", &self.id)?;
        require("book", &self.book)?;
        require("color", &self.color)?;
        require_position(self.chapter, self.verse)
    }
}

/// Narrows [`list_bookmarks`](crate::OfflineSyncStore::list_bookmarks).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkFilter {
    pub book: Option<String>,
    pub collection: Option<String>,
}

impl BookmarkFilter {
    pub fn book(book: impl Into<String>) -> Self {
        Self {
            book: Some(book.into()),
            ..Self::default()
        }
    }

    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: Some(collection.into()),
            ..Self::default()
        }
    }

    pub(crate) fn matches(&self, bookmark: &Bookmark) -> bool {
        self.collection
            .as_deref()
            .map_or(true, |c| bookmark.collection == c)
    }
}

/// Narrows [`list_highlights`](crate::OfflineSyncStore::list_highlights).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightFilter {
    pub book: Option<String>,
    pub chapter: Option<u32>,
}

impl HighlightFilter {
    pub fn chapter(book: impl Into<String>, chapter: u32) -> Self {
        Self {
            book: Some(book.into()),
            chapter: Some(chapter),
        }
    }

    pub(crate) fn matches(&self, highlight: &Highlight) -> bool {
        self.chapter.map_or(true, |c| highlight.chapter == c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bookmark_defaults() {
        let bookmark = Bookmark::new("John", 3, 16);
        assert_eq!(bookmark.id, "John-3-16");
        assert_eq!(bookmark.collection, DEFAULT_COLLECTION);
        assert!(bookmark.validate().is_ok());
    }

    #[test]
    fn test_book_abbreviations_resolve() {
        let bookmark = Bookmark::new("jn", 3, 16);
        assert_eq!(bookmark.book, "John");
        assert_eq!(bookmark.id, Bookmark::new("John", 3, 16).id);
        assert_eq!(Bookmark::composite_id("1 cor.", 13, 4), "1 Corinthians-13-4");
        assert_eq!(Highlight::new("gen", 1, 1, "light", "yellow").book, "Genesis");
    }

    #[test]
    fn test_bookmark_validation() {
        assert!(Bookmark::new("", 3, 16).validate().is_err());
        assert!(Bookmark::new("John", 0, 16).validate().is_err());
        assert!(Bookmark::new("John", 3, 0).validate().is_err());
        assert!(Bookmark::new("John", 3, 16)
            .with_collection(" ")
            .validate()
            .is_err());
    }

    #[test]
    fn test_bookmark_wire_format() {
        let bookmark = Bookmark::new("John", 3, 16).with_note("memorize");
        let value = serde_json::to_value(&bookmark).unwrap();
        assert_eq!(value["book"], "John");
        assert_eq!(value["note"], "memorize");
        assert!(value.get("createdAt").is_some());

        let plain = serde_json::to_value(Bookmark::new("John", 3, 17)).unwrap();
        assert!(plain.get("note").is_none());
    }

    #[test]
    fn test_highlight_ids_are_unique() {
        let a = Highlight::new("Romans", 8, 28, "all things", "yellow");
        let b = Highlight::new("Romans", 8, 28, "all things", "yellow");
        assert_ne!(a.id, b.id);
        assert!(a.validate().is_ok());
        assert!(Highlight::new("Romans", 8, 28, "", "").validate().is_err());
    }
}
