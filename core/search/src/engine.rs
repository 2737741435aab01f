//! Scored full-text search over resident translations.

use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::sync::Arc;
use tracing::debug;

use crate::highlight::highlight_spans;
use crate::query::{normalize, normalize_query, SearchOptions};
use lectio_common::{canon, Error, Result, TranslationId, Verse};
use lectio_content::{TranslationCache, TranslationData};

/// Best score a single verse can reach: whole-word match at offset zero.
pub const MAX_SCORE: f64 = 3.0;

/// One matching verse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub verse: Verse,
    pub translation_id: TranslationId,
    pub score: f64,
    /// Half-open byte ranges into `verse.text`.
    pub highlight_spans: Vec<(usize, usize)>,
}

/// Canonical sort key of a book; known books first, in canon order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum BookKey {
    Known(usize),
    Other(String),
}

impl BookKey {
    fn of(book: &str) -> Self {
        match canon::position(book) {
            Some(position) => Self::Known(position),
            None => Self::Other(canon::normalize_book(book)),
        }
    }
}

struct Candidate {
    score: f64,
    book: BookKey,
    translation: TranslationId,
    verse: Verse,
}

impl Candidate {
    /// `Greater` means ranked higher.
    fn rank(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.book.cmp(&self.book))
            .then_with(|| other.verse.chapter.cmp(&self.verse.chapter))
            .then_with(|| other.verse.number.cmp(&self.verse.number))
            .then_with(|| other.translation.cmp(&self.translation))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.rank(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank(other)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_whole_word(haystack: &str, start: usize, end: usize) -> bool {
    let before = haystack[..start].chars().next_back();
    let after = haystack[end..].chars().next();
    !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
}

/// Score `needle` within normalized `haystack`, `None` if absent.
///
/// `(whole word ? 2 : 1) + 1 / (1 + position)`, where position is the byte
/// offset of the first whole-word occurrence, or of the first occurrence
/// when none is a whole word.
pub fn score(haystack: &str, needle: &str) -> Option<f64> {
    let mut first = None;
    let mut from = 0;

    while let Some(relative) = haystack[from..].find(needle) {
        let position = from + relative;
        if is_whole_word(haystack, position, position + needle.len()) {
            return Some(2.0 + 1.0 / (1.0 + position as f64));
        }
        first.get_or_insert(position);
        from = position + haystack[position..].chars().next().map_or(1, char::len_utf8);
    }

    first.map(|position| 1.0 + 1.0 / (1.0 + position as f64))
}

/// Search a fixed set of translations.
///
/// Translations are scanned book by book in canonical order, chapters
/// ascending, then translation id, then verse. Only the best `limit`
/// candidates are kept; the scan stops at a chapter boundary once every
/// kept candidate has [`MAX_SCORE`], since later verses cannot outrank them.
///
/// Early exit only helps queries with at least `limit` whole-word hits at
/// the very start of a verse. Most common queries never saturate and scan
/// every resident verse, so latency grows with the number of translations
/// loaded rather than with `limit`.
///
/// # Errors
/// - `InvalidQuery` for a zero limit or an unresolvable current-book filter
pub fn search_translations(
    query: &str,
    translations: &[(TranslationId, Arc<TranslationData>)],
    options: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    let matcher = options.book_matcher()?;
    let Some(needle) = normalize_query(query, options.case_sensitive) else {
        return Ok(Vec::new());
    };

    let mut ordered: Vec<&(TranslationId, Arc<TranslationData>)> = translations.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));
    ordered.dedup_by(|a, b| a.0 == b.0);

    // Group each translation's books under their canonical key.
    let mut books: BTreeMap<BookKey, Vec<(&TranslationId, &TranslationData, &str)>> =
        BTreeMap::new();
    for (id, data) in &ordered {
        for book in data.books() {
            if matcher.matches(book) {
                books
                    .entry(BookKey::of(book))
                    .or_default()
                    .push((id, data.as_ref(), book));
            }
        }
    }

    let limit = options.limit;
    let mut kept: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(limit + 1);
    let mut scanned = 0usize;

    'books: for (key, members) in &books {
        let chapters: BTreeSet<u32> = members
            .iter()
            .filter_map(|(_, data, book)| data.chapters(book))
            .flat_map(|chapters| chapters.keys().copied())
            .collect();

        for chapter in chapters {
            for (id, data, book) in members {
                let Some(verses) = data.chapter(book, chapter) else {
                    continue;
                };
                for verse in verses {
                    scanned += 1;
                    let haystack = normalize(&verse.text, options.case_sensitive);
                    let Some(verse_score) = score(&haystack, &needle) else {
                        continue;
                    };
                    kept.push(Reverse(Candidate {
                        score: verse_score,
                        book: key.clone(),
                        translation: (*id).clone(),
                        verse: verse.clone(),
                    }));
                    if kept.len() > limit {
                        kept.pop();
                    }
                }
            }

            let saturated = kept.len() == limit
                && kept
                    .peek()
                    .is_some_and(|Reverse(worst)| worst.score >= MAX_SCORE);
            if saturated {
                debug!(scanned, "search saturated, stopping early");
                break 'books;
            }
        }
    }

    let results: Vec<SearchResult> = kept
        .into_sorted_vec()
        .into_iter()
        .map(|Reverse(candidate)| {
            let highlight_spans =
                highlight_spans(&candidate.verse.text, &needle, options.case_sensitive);
            SearchResult {
                verse: candidate.verse,
                translation_id: candidate.translation,
                score: candidate.score,
                highlight_spans,
            }
        })
        .collect();

    debug!(query = %needle, scanned, results = results.len(), "search complete");
    Ok(results)
}

/// Search engine over the translations resident in a cache.
#[derive(Clone)]
pub struct SearchEngine {
    cache: TranslationCache,
}

impl SearchEngine {
    pub fn new(cache: TranslationCache) -> Self {
        Self { cache }
    }

    /// Search resident translations.
    ///
    /// Results are ordered by descending score; ties by canonical book,
    /// chapter, verse, then translation id. Queries shorter than two
    /// characters return no results.
    ///
    /// # Errors
    /// - `NotLoaded` if a requested translation is not resident
    /// - `InvalidQuery` for a zero limit or an unresolvable current-book filter
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let translations = if options.translation_ids.is_empty() {
            self.cache.snapshot()
        } else {
            let mut ids = options.translation_ids.clone();
            ids.sort();
            ids.dedup();
            ids.into_iter()
                .map(|id| match self.cache.get(&id) {
                    Some(data) => Ok((id, data)),
                    None => Err(Error::NotLoaded(id.to_string())),
                })
                .collect::<Result<Vec<_>>>()?
        };

        search_translations(query, &translations, options)
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::BookFilter;
    use async_trait::async_trait;
    use lectio_common::Testament;
    use lectio_content::TranslationLoader;

    fn id(s: &str) -> TranslationId {
        TranslationId::new(s).unwrap()
    }

    const KJV: &str = r#"{"data": {
        "Genesis": {"1": [
            {"number": 1, "text": "In the beginning God created the heaven and the earth."},
            {"number": 3, "text": "And God said, Let there be light: and there was light."}
        ]},
        "John": {"3": [
            {"number": 16, "text": "For God so loved the world, that he gave his only begotten Son"},
            {"number": 17, "text": "For God sent not his Son into the world to condemn the world"}
        ]},
        "1 John": {"4": [
            {"number": 8, "text": "He that loveth not knoweth not God; for God is love."}
        ]}
    }}"#;

    const WEB: &str = r#"{"data": {
        "John": {"3": [
            {"number": 16, "text": "For God so loved the world, that he gave his one and only Son"}
        ]}
    }}"#;

    fn translations() -> Vec<(TranslationId, Arc<TranslationData>)> {
        vec![
            (id("web"), Arc::new(TranslationData::parse(&id("web"), WEB.as_bytes()).unwrap())),
            (id("kjv"), Arc::new(TranslationData::parse(&id("kjv"), KJV.as_bytes()).unwrap())),
        ]
    }

    #[test]
    fn test_score() {
        assert_eq!(score("god is love", "god"), Some(3.0));
        assert_eq!(score("for god", "god"), Some(2.0 + 1.0 / 5.0));
        assert_eq!(score("godly", "god"), Some(2.0));
        // Whole-word occurrence wins over an earlier partial one.
        assert_eq!(score("godly god", "god"), Some(2.0 + 1.0 / 7.0));
        assert_eq!(score("heaven", "god"), None);
    }

    #[test]
    fn test_john_3_16_highlight() {
        let options = SearchOptions::new()
            .with_translation(id("kjv"))
            .with_book_filter(BookFilter::Book("John".to_string()));
        let results = search_translations("God", &translations()[1..], &options).unwrap();

        let john_3_16 = results
            .iter()
            .find(|r| r.verse.reference() == "John 3:16")
            .unwrap();
        assert_eq!(john_3_16.highlight_spans, vec![(4, 7)]);
        assert_eq!(john_3_16.translation_id, id("kjv"));
    }

    #[test]
    fn test_results_ranked_then_canonical() {
        let results = search_translations("god", &translations(), &SearchOptions::new()).unwrap();
        let refs: Vec<(String, &str)> = results
            .iter()
            .map(|r| (r.verse.reference(), r.translation_id.as_str()))
            .collect();

        // All matches are whole words; earlier position ranks higher, ties canonical.
        assert_eq!(
            refs,
            vec![
                ("Genesis 1:3".to_string(), "kjv"),
                ("John 3:16".to_string(), "kjv"),
                ("John 3:16".to_string(), "web"),
                ("John 3:17".to_string(), "kjv"),
                ("Genesis 1:1".to_string(), "kjv"),
                ("1 John 4:8".to_string(), "kjv"),
            ]
        );
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_search_is_deterministic() {
        let options = SearchOptions::new().with_limit(3);
        let first = search_translations("the world", &translations(), &options).unwrap();
        for _ in 0..5 {
            let mut shuffled = translations();
            shuffled.reverse();
            assert_eq!(search_translations("the world", &shuffled, &options).unwrap(), first);
        }
    }

    #[test]
    fn test_limit_keeps_best() {
        let all = search_translations("god", &translations(), &SearchOptions::new()).unwrap();
        let limited =
            search_translations("god", &translations(), &SearchOptions::new().with_limit(2))
                .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(&all[..2], &limited[..]);
    }

    #[test]
    fn test_saturated_scan_matches_full_scan() {
        let options = SearchOptions::new().with_limit(1);
        let results = search_translations("in the", &translations(), &options).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, MAX_SCORE);
        assert_eq!(results[0].verse.reference(), "Genesis 1:1");
    }

    #[test]
    fn test_testament_filter() {
        let options = SearchOptions::new().with_book_filter(BookFilter::Testament(Testament::Old));
        let results = search_translations("god", &translations(), &options).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.verse.book == "Genesis"));
    }

    #[test]
    fn test_case_sensitive() {
        let options = SearchOptions::new().with_case_sensitive(true);
        assert!(search_translations("GOD", &translations(), &options)
            .unwrap()
            .is_empty());
        assert_eq!(
            search_translations("Son", &translations(), &options)
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn test_greek_final_sigma_matches_and_highlights() {
        let greek = r#"{"data": {"John": {"14": [
            {"number": 6, "text": "λέγει αὐτῷ Ἰησοῦς· ἐγώ εἰμι ἡ ΟΔΟΣ"}
        ]}}}"#;
        let translations = vec![(
            id("tr"),
            Arc::new(TranslationData::parse(&id("tr"), greek.as_bytes()).unwrap()),
        )];
        let options = SearchOptions::new().with_translation(id("tr"));
        let text = "λέγει αὐτῷ Ἰησοῦς· ἐγώ εἰμι ἡ ΟΔΟΣ";
        let start = text.find("ΟΔΟΣ").unwrap();

        for query in ["οδος", "οδοσ", "ΟΔΟΣ"] {
            let results = search_translations(query, &translations, &options).unwrap();
            assert_eq!(results.len(), 1, "query {}", query);
            assert_eq!(results[0].highlight_spans, vec![(start, text.len())]);
        }
    }

    #[test]
    fn test_short_query_is_empty() {
        let results = search_translations(" g ", &translations(), &SearchOptions::new()).unwrap();
        assert!(results.is_empty());
    }

    struct FixtureLoader;

    #[async_trait]
    impl TranslationLoader for FixtureLoader {
        fn name(&self) -> &str {
            "fixture"
        }

        async fn fetch(&self, id: &TranslationId) -> Result<TranslationData> {
            match id.as_str() {
                "kjv" => TranslationData::parse(id, KJV.as_bytes()),
                "web" => TranslationData::parse(id, WEB.as_bytes()),
                _ => Err(Error::load_failed(id.as_str(), "unknown")),
            }
        }
    }

    #[tokio::test]
    async fn test_engine_requires_resident_translations() {
        let cache = TranslationCache::with_loader(Arc::new(FixtureLoader));
        let engine = SearchEngine::new(cache.clone());

        assert!(engine.search("god", &SearchOptions::new()).unwrap().is_empty());

        let options = SearchOptions::new().with_translation(id("kjv"));
        assert!(matches!(
            engine.search("god", &options),
            Err(Error::NotLoaded(_))
        ));

        cache.ensure_loaded(&id("kjv")).await.unwrap();
        assert_eq!(engine.search("god", &options).unwrap().len(), 5);

        cache.ensure_loaded(&id("web")).await.unwrap();
        assert_eq!(engine.search("god", &SearchOptions::new()).unwrap().len(), 6);
    }
}
