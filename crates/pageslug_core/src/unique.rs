use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::config::SlugFieldPolicy;
use crate::error::{StorageError, StorageResult};
use crate::model::{DRAFT_PARENT_ID, PageRecord};
use crate::store::{PageOrder, PageQuery, RecordStore};

/// Parent id that scopes `record`: drafts borrow their live record's parent.
pub fn effective_parent_id<R: RecordStore>(records: &R, record: &PageRecord) -> StorageResult<i64> {
    if !record.is_draft() {
        return Ok(record.parent_id);
    }
    match records.find(record.version_origin_id)? {
        Some(live) => Ok(live.parent_id),
        None => Err(StorageError::RowMissing {
            table: records.table_name().to_string(),
            id: record.version_origin_id,
        }),
    }
}

/// Append `-n` to the last segment, shortening the base so the result fits
/// `max_length`. At least one character of a non-root base survives.
pub fn with_suffix(slug: &str, n: u32, max_length: usize) -> StorageResult<String> {
    let suffix = format!("-{n}");
    let body = slug.trim_matches('/');
    let room = max_length.saturating_sub(suffix.chars().count() + 2);
    let mut base: String = body.chars().take(room).collect();
    while base.ends_with(|ch: char| !ch.is_alphanumeric()) {
        base.pop();
    }

    let candidate = format!("/{base}{suffix}/");
    if (base.is_empty() && !body.is_empty()) || candidate.chars().count() > max_length {
        return Err(StorageError::SuffixOverflow {
            slug: slug.to_string(),
            n,
            max_length,
        });
    }
    Ok(candidate)
}

/// Applies the site and parent uniqueness rules of a slug field.
pub struct UniquenessResolver<'a, R> {
    records: &'a R,
    policy: &'a SlugFieldPolicy,
    site_roots: RefCell<HashMap<i64, i64>>,
}

impl<'a, R: RecordStore> UniquenessResolver<'a, R> {
    pub fn new(records: &'a R, policy: &'a SlugFieldPolicy) -> Self {
        Self {
            records,
            policy,
            site_roots: RefCell::new(HashMap::new()),
        }
    }

    /// Site uniqueness first, then parent uniqueness on the result.
    pub fn resolve(
        &self,
        slug: String,
        record_id: i64,
        parent_id: i64,
        language_id: i64,
    ) -> StorageResult<String> {
        let slug = self.ensure_unique_in_site(slug, record_id, parent_id, language_id)?;
        self.ensure_unique_in_pid(slug, record_id, parent_id, language_id)
    }

    pub fn ensure_unique_in_site(
        &self,
        slug: String,
        record_id: i64,
        parent_id: i64,
        language_id: i64,
    ) -> StorageResult<String> {
        if !self.policy.unique_in_site {
            return Ok(slug);
        }
        let own_site = self.site_root(record_id, parent_id)?;
        let related = self.related_ids(record_id)?;
        self.first_free(slug, |candidate| {
            for other in self.others_with_slug(candidate, language_id, &related)? {
                let other_parent = self.lenient_parent(&other)?;
                if self.site_root(other.id, other_parent)? == own_site {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    pub fn ensure_unique_in_pid(
        &self,
        slug: String,
        record_id: i64,
        parent_id: i64,
        language_id: i64,
    ) -> StorageResult<String> {
        if !self.policy.unique_in_pid {
            return Ok(slug);
        }
        let related = self.related_ids(record_id)?;
        self.first_free(slug, |candidate| {
            for other in self.others_with_slug(candidate, language_id, &related)? {
                if self.lenient_parent(&other)? == parent_id {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    fn first_free<F>(&self, slug: String, taken: F) -> StorageResult<String>
    where
        F: Fn(&str) -> StorageResult<bool>,
    {
        if !taken(&slug)? {
            return Ok(slug);
        }
        let mut n = 1u32;
        loop {
            let candidate = with_suffix(&slug, n, self.policy.max_length)?;
            if !taken(&candidate)? {
                log::debug!("slug {slug} is taken, using {candidate}");
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// The record itself and its live counterpart when it is a draft.
    fn related_ids(&self, record_id: i64) -> StorageResult<HashSet<i64>> {
        let mut related = HashSet::from([record_id]);
        if let Some(record) = self.records.find(record_id)?
            && record.is_draft()
        {
            related.insert(record.version_origin_id);
        }
        Ok(related)
    }

    fn others_with_slug(
        &self,
        slug: &str,
        language_id: i64,
        related: &HashSet<i64>,
    ) -> StorageResult<Vec<PageRecord>> {
        let matches = self
            .records
            .select(&PageQuery::with_slug(slug, language_id), PageOrder::Id)?;
        Ok(matches
            .into_iter()
            .filter(|other| !related.contains(&other.id))
            .filter(|other| !(other.is_draft() && related.contains(&other.version_origin_id)))
            .collect())
    }

    fn lenient_parent(&self, record: &PageRecord) -> StorageResult<i64> {
        match effective_parent_id(self.records, record) {
            Err(StorageError::RowMissing { .. }) => Ok(DRAFT_PARENT_ID),
            other => other,
        }
    }

    /// Nearest ancestor-or-self flagged as site root, else the top-most ancestor.
    fn site_root(&self, record_id: i64, parent_id: i64) -> StorageResult<i64> {
        if let Some(record) = self.records.find(record_id)?
            && record.is_site_root
        {
            return Ok(record_id);
        }
        if parent_id <= 0 {
            return Ok(record_id);
        }

        let mut visited = Vec::new();
        let mut seen = HashSet::from([record_id]);
        let mut cursor = parent_id;
        let root = loop {
            if let Some(&cached) = self.site_roots.borrow().get(&cursor) {
                break cached;
            }
            if !seen.insert(cursor) {
                return Err(StorageError::ParentCycle { id: record_id });
            }
            visited.push(cursor);
            let Some(page) = self.records.find(cursor)? else {
                break cursor;
            };
            if page.is_site_root {
                break cursor;
            }
            let next = self.lenient_parent(&page)?;
            if next <= 0 {
                break cursor;
            }
            cursor = next;
        };

        let mut cache = self.site_roots.borrow_mut();
        for page_id in visited {
            cache.insert(page_id, root);
        }
        Ok(root)
    }
}
