//! Known translations.

use serde::Deserialize;

use lectio_common::{Direction, Error, Result, Translation, TranslationId};

/// Static list of translations the reader offers.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct CatalogFile {
    translations: Vec<Translation>,
}

fn entry(
    id: &str,
    display_name: &str,
    abbreviation: &str,
    language: &str,
    direction: Direction,
) -> Result<Translation> {
    Ok(Translation {
        id: TranslationId::new(id)?,
        display_name: display_name.to_string(),
        abbreviation: abbreviation.to_string(),
        language: language.to_string(),
        direction,
    })
}

impl Catalog {
    /// Build a catalog, rejecting duplicate ids.
    pub fn new(translations: Vec<Translation>) -> Result<Self> {
        let mut catalog = Self::default();
        for translation in translations {
            catalog.insert(translation)?;
        }
        Ok(catalog)
    }

    /// Public-domain translations bundled with the reader.
    pub fn builtin() -> Result<Self> {
        Self::new(vec![
            entry("kjv", "King James Version", "KJV", "en", Direction::LeftToRight)?,
            entry("web", "World English Bible", "WEB", "en", Direction::LeftToRight)?,
            entry("asv", "American Standard Version", "ASV", "en", Direction::LeftToRight)?,
            entry("ylt", "Young's Literal Translation", "YLT", "en", Direction::LeftToRight)?,
            entry("svd", "Smith & Van Dyke", "SVD", "ar", Direction::RightToLeft)?,
        ])
    }

    /// Parse `{ "translations": [...] }`.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::new(file.translations)
    }

    /// Add a translation.
    ///
    /// # Errors
    /// - `AlreadyExists` if the id is taken
    pub fn insert(&mut self, translation: Translation) -> Result<()> {
        if self.get(&translation.id).is_some() {
            return Err(Error::AlreadyExists(format!(
                "Translation '{}' is already in the catalog",
                translation.id
            )));
        }
        self.translations.push(translation);
        Ok(())
    }

    pub fn get(&self, id: &TranslationId) -> Option<&Translation> {
        self.translations.iter().find(|t| &t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Translation> {
        self.translations.iter()
    }

    pub fn len(&self) -> usize {
        self.translations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(catalog.len(), 5);

        let kjv = catalog.get(&TranslationId::new("KJV").unwrap()).unwrap();
        assert_eq!(kjv.display_name, "King James Version");

        let svd = catalog.get(&TranslationId::new("svd").unwrap()).unwrap();
        assert_eq!(svd.direction, Direction::RightToLeft);
    }

    #[test]
    fn test_from_json() {
        let catalog = Catalog::from_json(
            r#"{"translations": [
                {"id": "BBE", "displayName": "Bible in Basic English", "abbreviation": "BBE", "language": "en"}
            ]}"#,
        )
        .unwrap();
        let bbe = catalog.iter().next().unwrap();
        assert_eq!(bbe.id.as_str(), "bbe");
        assert_eq!(bbe.direction, Direction::LeftToRight);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let json = r#"{"translations": [
            {"id": "kjv", "displayName": "A", "abbreviation": "A", "language": "en"},
            {"id": "KJV", "displayName": "B", "abbreviation": "B", "language": "en"}
        ]}"#;
        assert!(matches!(Catalog::from_json(json), Err(Error::AlreadyExists(_))));
    }
}
