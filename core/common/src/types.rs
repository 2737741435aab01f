//! Common types used throughout Lectio.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a translation, e.g. `kjv`.
///
/// Identifiers are trimmed and lowercased on construction so that
/// `"KJV"` and `"kjv"` address the same cache slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TranslationId(String);

impl TranslationId {
    /// Create a new TranslationId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or contains a path separator
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into().trim().to_lowercase();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "TranslationId cannot be empty".to_string(),
            ));
        }
        if id.contains('/') || id.contains('\\') {
            return Err(crate::Error::InvalidInput(format!(
                "TranslationId cannot contain separators: {}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TranslationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TranslationId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<TranslationId> for String {
    fn from(id: TranslationId) -> Self {
        id.0
    }
}

/// Script direction of a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    LeftToRight,
    RightToLeft,
}

/// Static description of a translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub id: TranslationId,
    pub display_name: String,
    pub abbreviation: String,
    pub language: String,
    #[serde(default)]
    pub direction: Direction,
}

/// A single verse of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verse {
    pub book: String,
    pub chapter: u32,
    pub number: u32,
    pub text: String,
}

impl Verse {
    /// Human readable reference, e.g. `John 3:16`.
    pub fn reference(&self) -> String {
        format!("{} {}:{}", self.book, self.chapter, self.number)
    }
}
