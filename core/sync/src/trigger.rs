//! Background sync tags and the trigger that requests them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::outbox::EntityKind;

/// Named background-sync request, one per entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyncTag {
    #[serde(rename = "sync-bookmarks")]
    Bookmarks,
    #[serde(rename = "sync-highlights")]
    Highlights,
}

impl SyncTag {
    pub const ALL: [SyncTag; 2] = [SyncTag::Bookmarks, SyncTag::Highlights];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bookmarks => "sync-bookmarks",
            Self::Highlights => "sync-highlights",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Bookmarks => EntityKind::Bookmark,
            Self::Highlights => EntityKind::Highlight,
        }
    }
}

impl fmt::Display for SyncTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives background-sync requests.
///
/// Requests are fire-and-forget: implementations must not block and
/// must not fail the caller.
pub trait SyncTrigger: Send + Sync {
    fn request(&self, tag: SyncTag);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names() {
        assert_eq!(SyncTag::Bookmarks.to_string(), "sync-bookmarks");
        assert_eq!(SyncTag::parse("sync-highlights"), Some(SyncTag::Highlights));
        assert_eq!(SyncTag::parse("sync-notes"), None);
        assert_eq!(
            serde_json::to_string(&SyncTag::Bookmarks).unwrap(),
            "\"sync-bookmarks\""
        );
    }

    #[test]
    fn test_tag_kind_round_trip() {
        for tag in SyncTag::ALL {
            assert_eq!(tag.kind().tag(), tag);
        }
    }
}
