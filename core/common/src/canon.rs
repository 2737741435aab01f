//! Canonical book order.
//!
//! Translations key their books by display name, so lookups go through a
//! normalized form (lowercase, no whitespace or dots) and a table of common
//! abbreviations.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Testament a book belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Testament {
    Old,
    New,
}

/// Book names in canonical order. The first 39 are the Old Testament.
pub const BOOKS: [&str; 66] = [
    "Genesis",
    "Exodus",
    "Leviticus",
    "Numbers",
    "Deuteronomy",
    "Joshua",
    "Judges",
    "Ruth",
    "1 Samuel",
    "2 Samuel",
    "1 Kings",
    "2 Kings",
    "1 Chronicles",
    "2 Chronicles",
    "Ezra",
    "Nehemiah",
    "Esther",
    "Job",
    "Psalms",
    "Proverbs",
    "Ecclesiastes",
    "Song of Solomon",
    "Isaiah",
    "Jeremiah",
    "Lamentations",
    "Ezekiel",
    "Daniel",
    "Hosea",
    "Joel",
    "Amos",
    "Obadiah",
    "Jonah",
    "Micah",
    "Nahum",
    "Habakkuk",
    "Zephaniah",
    "Haggai",
    "Zechariah",
    "Malachi",
    "Matthew",
    "Mark",
    "Luke",
    "John",
    "Acts",
    "Romans",
    "1 Corinthians",
    "2 Corinthians",
    "Galatians",
    "Ephesians",
    "Philippians",
    "Colossians",
    "1 Thessalonians",
    "2 Thessalonians",
    "1 Timothy",
    "2 Timothy",
    "Titus",
    "Philemon",
    "Hebrews",
    "James",
    "1 Peter",
    "2 Peter",
    "1 John",
    "2 John",
    "3 John",
    "Jude",
    "Revelation",
];

const OLD_TESTAMENT_LEN: usize = 39;

/// Alternate spellings and abbreviations, already normalized.
const ALIASES: &[(&str, &str)] = &[
    ("gen", "Genesis"),
    ("ex", "Exodus"),
    ("exod", "Exodus"),
    ("lev", "Leviticus"),
    ("num", "Numbers"),
    ("deut", "Deuteronomy"),
    ("josh", "Joshua"),
    ("judg", "Judges"),
    ("1sam", "1 Samuel"),
    ("2sam", "2 Samuel"),
    ("1kgs", "1 Kings"),
    ("2kgs", "2 Kings"),
    ("1chr", "1 Chronicles"),
    ("2chr", "2 Chronicles"),
    ("neh", "Nehemiah"),
    ("esth", "Esther"),
    ("ps", "Psalms"),
    ("psa", "Psalms"),
    ("psalm", "Psalms"),
    ("prov", "Proverbs"),
    ("eccl", "Ecclesiastes"),
    ("song", "Song of Solomon"),
    ("songofsongs", "Song of Solomon"),
    ("isa", "Isaiah"),
    ("jer", "Jeremiah"),
    ("lam", "Lamentations"),
    ("ezek", "Ezekiel"),
    ("dan", "Daniel"),
    ("hos", "Hosea"),
    ("obad", "Obadiah"),
    ("mic", "Micah"),
    ("nah", "Nahum"),
    ("hab", "Habakkuk"),
    ("zeph", "Zephaniah"),
    ("hag", "Haggai"),
    ("zech", "Zechariah"),
    ("mal", "Malachi"),
    ("matt", "Matthew"),
    ("mt", "Matthew"),
    ("mk", "Mark"),
    ("lk", "Luke"),
    ("jn", "John"),
    ("rom", "Romans"),
    ("1cor", "1 Corinthians"),
    ("2cor", "2 Corinthians"),
    ("gal", "Galatians"),
    ("eph", "Ephesians"),
    ("phil", "Philippians"),
    ("col", "Colossians"),
    ("1thess", "1 Thessalonians"),
    ("2thess", "2 Thessalonians"),
    ("1tim", "1 Timothy"),
    ("2tim", "2 Timothy"),
    ("phlm", "Philemon"),
    ("heb", "Hebrews"),
    ("jas", "James"),
    ("1pet", "1 Peter"),
    ("2pet", "2 Peter"),
    ("1jn", "1 John"),
    ("2jn", "2 John"),
    ("3jn", "3 John"),
    ("rev", "Revelation"),
    ("revelations", "Revelation"),
];

/// Normalize a book name for comparison: lowercase, whitespace and dots removed.
pub fn normalize_book(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Position of a book in the canon, if it is a known book.
pub fn position(name: &str) -> Option<usize> {
    let normalized = normalize_book(name);
    BOOKS
        .iter()
        .position(|book| normalize_book(book) == normalized)
        .or_else(|| {
            ALIASES
                .iter()
                .find(|(alias, _)| *alias == normalized)
                .and_then(|(_, book)| BOOKS.iter().position(|b| b == book))
        })
}

/// Canonical display name for a book name or abbreviation.
pub fn canonical_name(name: &str) -> Option<&'static str> {
    position(name).map(|idx| BOOKS[idx])
}

/// Name a book is stored under: the canonical name for known books,
/// otherwise the trimmed input.
pub fn resolve_book(name: &str) -> String {
    canonical_name(name)
        .map(str::to_string)
        .unwrap_or_else(|| name.trim().to_string())
}

/// Testament of a known book.
pub fn testament(name: &str) -> Option<Testament> {
    position(name).map(|idx| {
        if idx < OLD_TESTAMENT_LEN {
            Testament::Old
        } else {
            Testament::New
        }
    })
}

/// Whether two book names refer to the same book.
pub fn same_book(a: &str, b: &str) -> bool {
    match (position(a), position(b)) {
        (Some(x), Some(y)) => x == y,
        _ => normalize_book(a) == normalize_book(b),
    }
}

/// Compare two book names in canonical order.
///
/// Known books come first in canon order; unknown books follow,
/// ordered by their normalized name.
pub fn compare_books(a: &str, b: &str) -> Ordering {
    match (position(a), position(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => normalize_book(a).cmp(&normalize_book(b)),
    }
}
