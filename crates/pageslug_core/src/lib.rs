//! Backfills URL slugs for page records that predate the slug column.
//!
//! The [`backfill::SlugBackfillJob`] works against the collaborator traits in
//! [`store`]; [`sqlite::SqliteStore`] implements all of them on one database.

pub mod backfill;
pub mod config;
pub mod error;
pub mod migrate;
pub mod model;
pub mod runtime;
pub mod slug;
pub mod sqlite;
pub mod store;
pub mod unique;
