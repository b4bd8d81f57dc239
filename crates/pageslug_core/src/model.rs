use serde::Serialize;

/// Parent id carried by draft records that overlay a live record.
pub const DRAFT_PARENT_ID: i64 = -1;

/// Language id of the default language.
pub const DEFAULT_LANGUAGE_ID: i64 = 0;

/// Characters stripped from both ends of an alias before it counts as set.
/// The SQLite store builds its alias ordering from the same set.
pub const ALIAS_PADDING: [char; 6] = [' ', '\t', '\n', '\u{b}', '\u{c}', '\r'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRecord {
    pub id: i64,
    pub parent_id: i64,
    pub language_id: i64,
    /// Equals `id` for default-language records.
    pub default_language_page_id: i64,
    pub alias_path: Option<String>,
    pub slug: Option<String>,
    pub version_origin_id: i64,
    pub title: String,
    pub nav_title: Option<String>,
    pub is_site_root: bool,
}

impl PageRecord {
    pub fn is_draft(&self) -> bool {
        self.parent_id == DRAFT_PARENT_ID
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias_path
            .as_deref()
            .map(|alias| alias.trim_matches(&ALIAS_PADDING[..]))
            .filter(|alias| !alias.is_empty())
    }

    /// Value of a generator field by column name; unknown names yield `None`.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "title" => Some(self.title.as_str()),
            "nav_title" => self.nav_title.as_deref(),
            "alias" => self.alias_path.as_deref(),
            _ => None,
        };
        value.map(str::trim).filter(|value| !value.is_empty())
    }
}

/// The two historical legacy path table layouts, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyGeneration {
    PathData,
    PathCache,
}

impl LegacyGeneration {
    pub const NEWEST_FIRST: [Self; 2] = [Self::PathData, Self::PathCache];

    pub fn table_name(self) -> &'static str {
        match self {
            Self::PathData => "legacy_path_data",
            Self::PathCache => "legacy_path_cache",
        }
    }
}
