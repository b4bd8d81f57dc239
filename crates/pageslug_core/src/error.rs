use thiserror::Error;

/// Failures raised by the record store, legacy path index and completion flag.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{context}: {source}")]
    Sqlite {
        context: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("record {id} vanished from {table}")]
    RowMissing { table: String, id: i64 },
    #[error("parent chain of record {id} loops back on itself")]
    ParentCycle { id: i64 },
    #[error("no room for suffix -{n} on {slug} within {max_length} characters")]
    SuffixOverflow {
        slug: String,
        n: u32,
        max_length: usize,
    },
}

impl StorageError {
    pub fn sqlite(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Sqlite {
            context: context.into(),
            source,
        }
    }
}

/// Errors surfaced by the slug backfill to its caller.
#[derive(Debug, Error)]
pub enum BackfillError {
    /// Field configuration for the slug column is missing or unusable.
    #[error("slug field configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
