use std::collections::HashMap;

use crate::error::StorageResult;
use crate::model::{LegacyGeneration, PageRecord};

/// Row filter for page queries. Deleted rows never match; every other
/// field narrows the match when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    pub slug_missing: bool,
    pub slug: Option<String>,
    pub language_id: Option<i64>,
    pub default_language_page_id: Option<i64>,
}

impl PageQuery {
    pub fn missing_slug() -> Self {
        Self {
            slug_missing: true,
            ..Self::default()
        }
    }

    pub fn with_slug(slug: &str, language_id: i64) -> Self {
        Self {
            slug: Some(slug.to_string()),
            language_id: Some(language_id),
            ..Self::default()
        }
    }

    /// The translation (or the default-language page itself) of `page_id` in `language_id`.
    pub fn translation_of(page_id: i64, language_id: i64) -> Self {
        Self {
            default_language_page_id: Some(page_id),
            language_id: Some(language_id),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageOrder {
    #[default]
    Id,
    /// Records with an alias first, descending by alias, then ascending id.
    AliasFirst,
}

pub trait RecordStore {
    /// Name of the page table, used in user-facing messages.
    fn table_name(&self) -> &str;

    /// True when the page table exists and carries the slug column.
    fn supports_slugs(&self) -> StorageResult<bool>;

    fn count(&self, query: &PageQuery) -> StorageResult<usize>;

    fn select(&self, query: &PageQuery, order: PageOrder) -> StorageResult<Vec<PageRecord>>;

    /// Looks up a non-deleted record by id.
    fn find(&self, id: i64) -> StorageResult<Option<PageRecord>>;

    /// Fails with `StorageError::RowMissing` when no row with `id` remains.
    fn update_slug(&self, id: i64, slug: &str) -> StorageResult<()>;
}

pub type LegacyPathMap = HashMap<(i64, i64), String>;

pub trait LegacyPathIndex {
    fn exists(&self, generation: LegacyGeneration) -> StorageResult<bool>;

    /// Paths keyed by `(page_id, language_id)`, normalized to the slug form.
    fn load_all(&self, generation: LegacyGeneration) -> StorageResult<LegacyPathMap>;
}

pub trait CompletionFlag {
    fn is_set(&self) -> StorageResult<bool>;

    fn set(&self) -> StorageResult<()>;
}
