use std::fmt;

use serde::Serialize;

use crate::config::SlugFieldPolicy;
use crate::error::{BackfillError, StorageResult};
use crate::model::{LegacyGeneration, PageRecord};
use crate::slug::{AncestorSlugGenerator, SlugGenerator, sanitize};
use crate::store::{
    CompletionFlag, LegacyPathIndex, LegacyPathMap, PageOrder, PageQuery, RecordStore,
};
use crate::unique::{UniquenessResolver, effective_parent_id};

/// Which rule produced a slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlugSource {
    Legacy,
    Alias,
    Generated,
}

impl SlugSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy path",
            Self::Alias => "alias",
            Self::Generated => "generated",
        }
    }
}

/// One written slug, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillMessage {
    pub table: String,
    pub id: i64,
    pub slug: String,
    pub source: SlugSource,
    pub suffixed: bool,
}

impl fmt::Display for BackfillMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} slug set to \"{}\" ({})",
            self.table,
            self.id,
            self.slug,
            self.source.as_str()
        )?;
        if self.suffixed {
            write!(f, ", made unique")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub messages: Vec<BackfillMessage>,
    pub legacy_table: Option<String>,
    pub from_legacy: usize,
    pub from_alias: usize,
    pub generated: usize,
    pub suffixed: usize,
}

impl BackfillReport {
    fn record(&mut self, message: BackfillMessage) {
        match message.source {
            SlugSource::Legacy => self.from_legacy += 1,
            SlugSource::Alias => self.from_alias += 1,
            SlugSource::Generated => self.generated += 1,
        }
        if message.suffixed {
            self.suffixed += 1;
        }
        self.messages.push(message);
    }
}

/// One-shot migration that fills the slug of every page still missing one.
pub struct SlugBackfillJob<'a, R, L, F> {
    records: &'a R,
    legacy: &'a L,
    flag: &'a F,
    policy: SlugFieldPolicy,
}

impl<'a, S> SlugBackfillJob<'a, S, S, S>
where
    S: RecordStore + LegacyPathIndex + CompletionFlag,
{
    pub fn for_store(store: &'a S, policy: SlugFieldPolicy) -> Self {
        Self::new(store, store, store, policy)
    }
}

impl<'a, R, L, F> SlugBackfillJob<'a, R, L, F>
where
    R: RecordStore,
    L: LegacyPathIndex,
    F: CompletionFlag,
{
    pub fn new(records: &'a R, legacy: &'a L, flag: &'a F, policy: SlugFieldPolicy) -> Self {
        Self {
            records,
            legacy,
            flag,
            policy,
        }
    }

    pub fn policy(&self) -> &SlugFieldPolicy {
        &self.policy
    }

    /// Number of non-deleted records whose slug is empty or unset.
    pub fn outstanding(&self) -> Result<usize, BackfillError> {
        Ok(self.records.count(&PageQuery::missing_slug())?)
    }

    pub fn is_backfill_needed(&self) -> Result<bool, BackfillError> {
        if !self.records.supports_slugs()? {
            return Ok(false);
        }
        if self.flag.is_set()? {
            return Ok(false);
        }
        Ok(self.outstanding()? > 0)
    }

    pub fn run(&self) -> Result<BackfillReport, BackfillError> {
        let generator = AncestorSlugGenerator::new(self.records, &self.policy);
        self.run_with_generator(&generator)
    }

    /// Like `run`, with a caller-supplied source for slugs of records
    /// without legacy path or alias.
    pub fn run_with_generator<G: SlugGenerator>(
        &self,
        generator: &G,
    ) -> Result<BackfillReport, BackfillError> {
        let (generation, legacy_paths) = self.load_legacy_paths()?;
        let resolver = UniquenessResolver::new(self.records, &self.policy);
        let candidates = self
            .records
            .select(&PageQuery::missing_slug(), PageOrder::AliasFirst)?;
        log::info!(
            "backfilling {} slug(s) in {}",
            candidates.len(),
            self.records.table_name()
        );

        let mut report = BackfillReport {
            legacy_table: generation.map(|generation| generation.table_name().to_string()),
            ..BackfillReport::default()
        };
        for record in candidates {
            let message = self.process(&record, &legacy_paths, &resolver, generator)?;
            log::info!("{message}");
            report.record(message);
        }

        self.flag.set()?;
        Ok(report)
    }

    fn process<G: SlugGenerator>(
        &self,
        record: &PageRecord,
        legacy_paths: &LegacyPathMap,
        resolver: &UniquenessResolver<'_, R>,
        generator: &G,
    ) -> Result<BackfillMessage, BackfillError> {
        let parent_id = effective_parent_id(self.records, record)?;
        if record.is_draft() {
            log::debug!(
                "draft {} resolved to parent {parent_id} via live record {}",
                record.id,
                record.version_origin_id
            );
        }

        let (candidate, source) = self.candidate_slug(record, parent_id, legacy_paths, generator)?;
        let slug = resolver.resolve(candidate.clone(), record.id, parent_id, record.language_id)?;
        self.records.update_slug(record.id, &slug)?;

        Ok(BackfillMessage {
            table: self.records.table_name().to_string(),
            id: record.id,
            suffixed: slug != candidate,
            slug,
            source,
        })
    }

    fn candidate_slug<G: SlugGenerator>(
        &self,
        record: &PageRecord,
        parent_id: i64,
        legacy_paths: &LegacyPathMap,
        generator: &G,
    ) -> StorageResult<(String, SlugSource)> {
        if let Some(path) = legacy_paths.get(&(record.default_language_page_id, record.language_id)) {
            return Ok((path.clone(), SlugSource::Legacy));
        }
        if let Some(alias) = record.alias() {
            return Ok((sanitize(&format!("/{alias}"), &self.policy), SlugSource::Alias));
        }
        Ok((generator.generate(record, parent_id)?, SlugSource::Generated))
    }

    fn load_legacy_paths(&self) -> StorageResult<(Option<LegacyGeneration>, LegacyPathMap)> {
        let mut present = Vec::new();
        for generation in LegacyGeneration::NEWEST_FIRST {
            if self.legacy.exists(generation)? {
                present.push(generation);
            }
        }

        let Some(&chosen) = present.first() else {
            return Ok((None, LegacyPathMap::new()));
        };
        if present.len() > 1 {
            log::warn!(
                "both {} and {} exist; only {} is used",
                LegacyGeneration::PathData.table_name(),
                LegacyGeneration::PathCache.table_name(),
                chosen.table_name()
            );
        }
        let paths = self.legacy.load_all(chosen)?;
        log::info!(
            "loaded {} legacy path(s) from {}",
            paths.len(),
            chosen.table_name()
        );
        Ok((Some(chosen), paths))
    }
}
