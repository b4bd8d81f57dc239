use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::error::{BackfillError, StorageError, StorageResult};
use crate::model::{ALIAS_PADDING, DEFAULT_LANGUAGE_ID, LegacyGeneration, PageRecord};
use crate::slug::normalize_legacy_path;
use crate::store::{
    CompletionFlag, LegacyPathIndex, LegacyPathMap, PageOrder, PageQuery, RecordStore,
};

/// Identifier under which the completion flag is stored.
pub const WIZARD_IDENTIFIER: &str = "populate_page_slugs";

const WIZARD_TABLE_SQL: &str = include_str!("migrations/v002_upgrade_wizards.sql");

/// SQLite-backed page table, legacy path tables and wizard registry.
pub struct SqliteStore {
    connection: Connection,
    table: String,
    field: String,
}

impl SqliteStore {
    pub fn new(connection: Connection, table: &str, field: &str) -> Result<Self, BackfillError> {
        for identifier in [table, field] {
            if !is_identifier(identifier) {
                return Err(BackfillError::Configuration(format!(
                    "{identifier:?} is not a valid table or column name"
                )));
            }
        }
        Ok(Self {
            connection,
            table: table.to_string(),
            field: field.to_string(),
        })
    }

    pub fn open(db_path: &Path, table: &str, field: &str) -> Result<Self> {
        let connection = open_connection(db_path)?;
        Ok(Self::new(connection, table, field)?)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn field_name(&self) -> &str {
        &self.field
    }

    fn select_columns(&self) -> String {
        format!(
            "id, parent_id, language_id, default_language_page_id, alias, {field}, version_origin_id, title, nav_title, is_site_root",
            field = self.field
        )
    }

    fn where_clause(&self, query: &PageQuery) -> (String, Vec<Value>) {
        let field = &self.field;
        let mut clauses = vec!["deleted = 0".to_string()];
        let mut values = Vec::new();

        if query.slug_missing {
            clauses.push(format!("({field} IS NULL OR {field} = '')"));
        }
        if let Some(slug) = &query.slug {
            clauses.push(format!("{field} = ?"));
            values.push(Value::Text(slug.clone()));
        }
        if let Some(language_id) = query.language_id {
            clauses.push("language_id = ?".to_string());
            values.push(Value::Integer(language_id));
        }
        if let Some(page_id) = query.default_language_page_id {
            // Default-language rows store 0 here and are matched by their own id.
            clauses.push(
                "(default_language_page_id = ? OR (language_id = ? AND id = ?))".to_string(),
            );
            values.push(Value::Integer(page_id));
            values.push(Value::Integer(DEFAULT_LANGUAGE_ID));
            values.push(Value::Integer(page_id));
        }

        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }

    fn table_exists(&self, table_name: &str) -> StorageResult<bool> {
        let exists: i64 = self
            .connection
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [table_name],
                |row| row.get(0),
            )
            .map_err(|source| {
                StorageError::sqlite(
                    format!("failed to check sqlite_master for table {table_name}"),
                    source,
                )
            })?;
        Ok(exists == 1)
    }
}

/// `alias` trimmed of the same padding `PageRecord::alias` strips.
fn trimmed_alias_sql() -> String {
    let codes: Vec<String> = ALIAS_PADDING
        .iter()
        .map(|ch| u32::from(*ch).to_string())
        .collect();
    format!("TRIM(alias, char({}))", codes.join(", "))
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    let id: i64 = row.get(0)?;
    let language_id: i64 = row.get(2)?;
    let stored_default: i64 = row.get(3)?;
    Ok(PageRecord {
        id,
        parent_id: row.get(1)?,
        language_id,
        default_language_page_id: if language_id == DEFAULT_LANGUAGE_ID || stored_default == 0 {
            id
        } else {
            stored_default
        },
        alias_path: row.get(4)?,
        slug: row.get(5)?,
        version_origin_id: row.get(6)?,
        title: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        nav_title: row.get(8)?,
        is_site_root: row.get::<_, i64>(9)? != 0,
    })
}

impl RecordStore for SqliteStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn supports_slugs(&self) -> StorageResult<bool> {
        if !self.table_exists(&self.table)? {
            return Ok(false);
        }
        let columns: i64 = self
            .connection
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
                params![self.table, self.field],
                |row| row.get(0),
            )
            .map_err(|source| {
                StorageError::sqlite(format!("failed to inspect columns of {}", self.table), source)
            })?;
        Ok(columns > 0)
    }

    fn count(&self, query: &PageQuery) -> StorageResult<usize> {
        let (clause, values) = self.where_clause(query);
        let sql = format!("SELECT COUNT(*) FROM {}{clause}", self.table);
        let count: i64 = self
            .connection
            .query_row(&sql, params_from_iter(values), |row| row.get(0))
            .map_err(|source| StorageError::sqlite(format!("failed query: {sql}"), source))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn select(&self, query: &PageQuery, order: PageOrder) -> StorageResult<Vec<PageRecord>> {
        let (clause, values) = self.where_clause(query);
        let order_by = match order {
            PageOrder::Id => "id ASC".to_string(),
            PageOrder::AliasFirst => {
                let trimmed = trimmed_alias_sql();
                format!("COALESCE({trimmed}, '') = '' ASC, COALESCE({trimmed}, '') DESC, id ASC")
            }
        };
        let sql = format!(
            "SELECT {} FROM {}{clause} ORDER BY {order_by}",
            self.select_columns(),
            self.table
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .map_err(|source| StorageError::sqlite(format!("failed to prepare {sql}"), source))?;
        let rows = statement
            .query_map(params_from_iter(values), page_from_row)
            .map_err(|source| StorageError::sqlite(format!("failed query: {sql}"), source))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|source| {
                StorageError::sqlite(format!("failed to decode row of {}", self.table), source)
            })?);
        }
        Ok(out)
    }

    fn find(&self, id: i64) -> StorageResult<Option<PageRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1 AND deleted = 0",
            self.select_columns(),
            self.table
        );
        self.connection
            .query_row(&sql, [id], page_from_row)
            .optional()
            .map_err(|source| {
                StorageError::sqlite(format!("failed to load {}:{id}", self.table), source)
            })
    }

    fn update_slug(&self, id: i64, slug: &str) -> StorageResult<()> {
        let sql = format!("UPDATE {} SET {} = ?1 WHERE id = ?2", self.table, self.field);
        let affected = self
            .connection
            .execute(&sql, params![slug, id])
            .map_err(|source| {
                StorageError::sqlite(format!("failed to update {}:{id}", self.table), source)
            })?;
        if affected == 0 {
            return Err(StorageError::RowMissing {
                table: self.table.clone(),
                id,
            });
        }
        Ok(())
    }
}

impl LegacyPathIndex for SqliteStore {
    fn exists(&self, generation: LegacyGeneration) -> StorageResult<bool> {
        self.table_exists(generation.table_name())
    }

    fn load_all(&self, generation: LegacyGeneration) -> StorageResult<LegacyPathMap> {
        let table = generation.table_name();
        // Permanent rows first, then the earliest expiry; the first row per key wins.
        let sql = format!(
            "SELECT page_id, language_id, path FROM {table}
             WHERE variant IS NULL OR variant = ''
             ORDER BY (COALESCE(expire, 0) = 0) DESC, COALESCE(expire, 0) ASC, rowid ASC"
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .map_err(|source| StorageError::sqlite(format!("failed to prepare {sql}"), source))?;
        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(|source| StorageError::sqlite(format!("failed query: {sql}"), source))?;

        let mut out = LegacyPathMap::new();
        for row in rows {
            let (page_id, language_id, path) = row.map_err(|source| {
                StorageError::sqlite(format!("failed to decode row of {table}"), source)
            })?;
            let Some(path) = path.filter(|path| !path.trim().is_empty()) else {
                continue;
            };
            out.entry((page_id, language_id))
                .or_insert_with(|| normalize_legacy_path(&path));
        }
        Ok(out)
    }
}

impl CompletionFlag for SqliteStore {
    fn is_set(&self) -> StorageResult<bool> {
        if !self.table_exists("upgrade_wizards")? {
            return Ok(false);
        }
        let exists: i64 = self
            .connection
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM upgrade_wizards WHERE identifier = ?1)",
                [WIZARD_IDENTIFIER],
                |row| row.get(0),
            )
            .map_err(|source| StorageError::sqlite("failed to read upgrade_wizards", source))?;
        Ok(exists == 1)
    }

    fn set(&self) -> StorageResult<()> {
        self.connection
            .execute_batch(WIZARD_TABLE_SQL)
            .map_err(|source| StorageError::sqlite("failed to create upgrade_wizards", source))?;
        let now = unix_timestamp()
            .ok()
            .and_then(|secs| i64::try_from(secs).ok())
            .unwrap_or_default();
        self.connection
            .execute(
                "INSERT OR REPLACE INTO upgrade_wizards (identifier, completed_at_unix) VALUES (?1, ?2)",
                params![WIZARD_IDENTIFIER, now],
            )
            .map_err(|source| StorageError::sqlite("failed to mark wizard complete", source))?;
        Ok(())
    }
}

pub(crate) fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

pub(crate) fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")
        .map(|duration| duration.as_secs())
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(ch) if ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::params;
    use tempfile::TempDir;

    use super::SqliteStore;
    use crate::migrate::migrate_connection;

    pub(crate) struct Seed {
        pub id: i64,
        pub parent_id: i64,
        pub language_id: i64,
        pub default_language_page_id: i64,
        pub version_origin_id: i64,
        pub is_site_root: bool,
        pub deleted: bool,
        pub title: &'static str,
        pub nav_title: Option<&'static str>,
        pub alias: Option<&'static str>,
        pub slug: Option<&'static str>,
    }

    impl Seed {
        pub fn page(id: i64, parent_id: i64, title: &'static str) -> Self {
            Self {
                id,
                parent_id,
                language_id: 0,
                default_language_page_id: 0,
                version_origin_id: 0,
                is_site_root: false,
                deleted: false,
                title,
                nav_title: None,
                alias: None,
                slug: None,
            }
        }
    }

    pub(crate) fn migrated_store() -> (TempDir, SqliteStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let connection =
            super::open_connection(&temp.path().join("pageslug.db")).expect("open connection");
        migrate_connection(&connection).expect("migrate");
        let store = SqliteStore::new(connection, "pages", "slug").expect("store");
        (temp, store)
    }

    pub(crate) fn insert(store: &SqliteStore, seed: Seed) {
        store
            .connection()
            .execute(
                "INSERT INTO pages (id, parent_id, deleted, language_id, default_language_page_id, version_origin_id, is_site_root, title, nav_title, alias, slug)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    seed.id,
                    seed.parent_id,
                    i64::from(seed.deleted),
                    seed.language_id,
                    seed.default_language_page_id,
                    seed.version_origin_id,
                    i64::from(seed.is_site_root),
                    seed.title,
                    seed.nav_title,
                    seed.alias,
                    seed.slug,
                ],
            )
            .expect("insert page");
    }

    pub(crate) fn create_legacy_table(store: &SqliteStore, table: &str) {
        store
            .connection()
            .execute_batch(&format!(
                "CREATE TABLE {table} (
                    page_id INTEGER NOT NULL,
                    language_id INTEGER NOT NULL,
                    path TEXT,
                    variant TEXT,
                    expire INTEGER
                );"
            ))
            .expect("create legacy table");
    }

    pub(crate) fn insert_legacy(
        store: &SqliteStore,
        table: &str,
        page_id: i64,
        language_id: i64,
        path: &str,
        variant: &str,
        expire: i64,
    ) {
        store
            .connection()
            .execute(
                &format!(
                    "INSERT INTO {table} (page_id, language_id, path, variant, expire) VALUES (?1, ?2, ?3, ?4, ?5)"
                ),
                params![page_id, language_id, path, variant, expire],
            )
            .expect("insert legacy row");
    }

    pub(crate) fn slug_of(store: &SqliteStore, id: i64) -> Option<String> {
        store
            .connection()
            .query_row("SELECT slug FROM pages WHERE id = ?1", [id], |row| row.get(0))
            .expect("read slug")
    }
}
