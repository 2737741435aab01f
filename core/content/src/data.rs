//! In-memory translation content and its JSON wire format.

use serde::Deserialize;
use std::collections::BTreeMap;

use lectio_common::{canon, Error, Result, TranslationId, Verse};

/// Chapter number → ordered verses.
pub type Chapters = BTreeMap<u32, Vec<Verse>>;

/// Verse text of one translation, keyed by book name and chapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationData {
    books: BTreeMap<String, Chapters>,
}

#[derive(Deserialize)]
struct RawDocument {
    data: BTreeMap<String, BTreeMap<String, Vec<RawVerse>>>,
}

#[derive(Deserialize)]
struct RawVerse {
    #[serde(alias = "verse")]
    number: u32,
    text: String,
}

impl TranslationData {
    /// Build from already structured books.
    pub fn from_books(books: BTreeMap<String, Chapters>) -> Self {
        Self { books }
    }

    /// Parse a `{ "data": { book: { chapter: [verse] } } }` document.
    ///
    /// Book and chapter of every verse are taken from the enclosing keys;
    /// verses are ordered by number.
    ///
    /// # Errors
    /// - `LoadFailed` if the JSON is malformed or a chapter key is not a number
    pub fn parse(id: &TranslationId, bytes: &[u8]) -> Result<Self> {
        let raw: RawDocument =
            serde_json::from_slice(bytes).map_err(|e| Error::load_failed(id.as_str(), e))?;

        let mut books = BTreeMap::new();
        for (book, raw_chapters) in raw.data {
            let mut chapters = Chapters::new();
            for (chapter_key, raw_verses) in raw_chapters {
                let chapter: u32 = chapter_key.trim().parse().map_err(|_| {
                    Error::load_failed(
                        id.as_str(),
                        format!("invalid chapter key '{}' in {}", chapter_key, book),
                    )
                })?;
                let mut verses: Vec<Verse> = raw_verses
                    .into_iter()
                    .map(|v| Verse {
                        book: book.clone(),
                        chapter,
                        number: v.number,
                        text: v.text,
                    })
                    .collect();
                verses.sort_by_key(|v| v.number);
                chapters.insert(chapter, verses);
            }
            books.insert(book, chapters);
        }

        Ok(Self { books })
    }

    /// Resolve the stored key for a book name.
    ///
    /// Tries the exact key first, then canonical aliases ("Jn" → "John").
    pub fn book_key(&self, book: &str) -> Option<&str> {
        if let Some((key, _)) = self.books.get_key_value(book) {
            return Some(key.as_str());
        }
        self.books
            .keys()
            .find(|key| canon::same_book(key, book))
            .map(String::as_str)
    }

    /// Verses of one chapter, if present.
    pub fn chapter(&self, book: &str, chapter: u32) -> Option<&[Verse]> {
        let key = self.book_key(book)?;
        self.books.get(key)?.get(&chapter).map(Vec::as_slice)
    }

    /// Chapters of one book, if present.
    pub fn chapters(&self, book: &str) -> Option<&Chapters> {
        let key = self.book_key(book)?;
        self.books.get(key)
    }

    /// Book names in canonical order.
    pub fn books(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.books.keys().map(String::as_str).collect();
        names.sort_by(|a, b| canon::compare_books(a, b));
        names
    }

    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    pub fn verse_count(&self) -> usize {
        self.books
            .values()
            .flat_map(|chapters| chapters.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.verse_count() == 0
    }

    /// Rough number of bytes of text held.
    pub fn approximate_size(&self) -> u64 {
        self.books
            .values()
            .flat_map(|chapters| chapters.values())
            .flatten()
            .map(|v| (v.text.len() + v.book.len() + 8) as u64)
            .sum()
    }
}
