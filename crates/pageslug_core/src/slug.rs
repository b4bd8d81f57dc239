use std::collections::HashSet;

use crate::config::SlugFieldPolicy;
use crate::error::{StorageError, StorageResult};
use crate::model::{DEFAULT_LANGUAGE_ID, PageRecord};
use crate::store::{PageOrder, PageQuery, RecordStore};

/// Normalize arbitrary input into the slug form: lowercase segments made of
/// letters, digits and the fallback character, wrapped in `/`.
pub fn sanitize(input: &str, policy: &SlugFieldPolicy) -> String {
    let fallback = policy.fallback_character;
    let segments: Vec<String> = input
        .split('/')
        .map(|segment| sanitize_segment(segment, fallback))
        .filter(|segment| !segment.is_empty())
        .collect();
    let joined = if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", segments.join("/"))
    };
    truncate_slug(&joined, policy.max_length)
}

fn sanitize_segment(segment: &str, fallback: char) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut prev_fallback = false;

    for ch in segment.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            out.push(ch);
            prev_fallback = false;
        } else if (is_separator(ch) || ch == fallback) && !prev_fallback && !out.is_empty() {
            out.push(fallback);
            prev_fallback = true;
        }
    }

    while out.ends_with(fallback) {
        out.pop();
    }
    out
}

fn is_separator(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '-' | '_' | '.' | '+' | ',' | ':' | ';' | '&' | '|')
}

/// Shorten `slug` to at most `max_length` characters, keeping the `/` wrapping.
pub(crate) fn truncate_slug(slug: &str, max_length: usize) -> String {
    if max_length < 2 || slug.chars().count() <= max_length {
        return slug.to_string();
    }
    let body: String = slug
        .trim_matches('/')
        .chars()
        .take(max_length - 2)
        .collect();
    let body = body.trim_end_matches(|ch: char| !ch.is_alphanumeric());
    if body.is_empty() {
        "/".to_string()
    } else {
        format!("/{body}/")
    }
}

/// Wrap a legacy path segment in the slug form without altering its characters.
pub fn normalize_legacy_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

/// Source of slugs for records that have neither a legacy path nor an alias.
pub trait SlugGenerator {
    fn generate(&self, record: &PageRecord, parent_id: i64) -> StorageResult<String>;
}

/// Builds a slug from the record's title fields below its parent's slug,
/// falling back to the ancestors' titles where the parent has no slug yet.
pub struct AncestorSlugGenerator<'a, R> {
    records: &'a R,
    policy: &'a SlugFieldPolicy,
}

impl<'a, R: RecordStore> AncestorSlugGenerator<'a, R> {
    pub fn new(records: &'a R, policy: &'a SlugFieldPolicy) -> Self {
        Self { records, policy }
    }

    fn segment_for(&self, record: &PageRecord) -> String {
        self.policy
            .generator_fields
            .iter()
            .find_map(|field| record.field(field))
            .map(|value| sanitize_segment(&value.replace('/', " "), self.policy.fallback_character))
            .unwrap_or_default()
    }

    /// The parent as seen from `language_id`: its translation when one exists.
    fn localized_parent(&self, parent_id: i64, language_id: i64) -> StorageResult<Option<PageRecord>> {
        if language_id != DEFAULT_LANGUAGE_ID {
            let translations = self.records.select(
                &PageQuery::translation_of(parent_id, language_id),
                PageOrder::Id,
            )?;
            if let Some(translation) = translations.into_iter().find(|page| !page.is_draft()) {
                return Ok(Some(translation));
            }
        }
        self.records.find(parent_id)
    }

    fn prefix_for(&self, record_id: i64, parent_id: i64, language_id: i64) -> StorageResult<String> {
        let mut segments = Vec::new();
        let mut seen = HashSet::from([record_id]);
        let mut cursor = parent_id;

        while cursor > 0 {
            if !seen.insert(cursor) {
                return Err(StorageError::ParentCycle { id: record_id });
            }
            let Some(parent) = self.localized_parent(cursor, language_id)? else {
                break;
            };
            if parent.is_site_root {
                break;
            }
            if let Some(slug) = parent.slug.as_deref().filter(|slug| !slug.is_empty()) {
                segments.push(slug.trim_matches('/').to_string());
                break;
            }
            let segment = self.segment_for(&parent);
            if !segment.is_empty() {
                segments.push(segment);
            }
            cursor = if parent.is_draft() {
                self.records
                    .find(parent.version_origin_id)?
                    .map_or(0, |live| live.parent_id)
            } else {
                self.live_parent_of(&parent)?
            };
        }

        segments.reverse();
        Ok(segments.join("/"))
    }

    /// Translations share their default-language page's position in the tree.
    fn live_parent_of(&self, page: &PageRecord) -> StorageResult<i64> {
        if page.language_id == DEFAULT_LANGUAGE_ID || page.default_language_page_id == page.id {
            return Ok(page.parent_id);
        }
        Ok(self
            .records
            .find(page.default_language_page_id)?
            .map_or(page.parent_id, |default| default.parent_id))
    }
}

impl<R: RecordStore> SlugGenerator for AncestorSlugGenerator<'_, R> {
    fn generate(&self, record: &PageRecord, parent_id: i64) -> StorageResult<String> {
        if record.is_site_root {
            return Ok("/".to_string());
        }
        let prefix = self.prefix_for(record.id, parent_id, record.language_id)?;
        let own = self.segment_for(record);
        Ok(sanitize(&format!("{prefix}/{own}"), self.policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SlugFieldPolicy {
        SlugFieldPolicy::default()
    }

    #[test]
    fn sanitize_lowercases_and_collapses_separators() {
        assert_eq!(sanitize("/About Us", &policy()), "/about-us/");
        assert_eq!(sanitize("Hello,   World!!", &policy()), "/hello-world/");
        assert_eq!(sanitize("a__b--c", &policy()), "/a-b-c/");
        assert_eq!(sanitize("//news//2019/", &policy()), "/news/2019/");
    }

    #[test]
    fn sanitize_keeps_unicode_letters() {
        assert_eq!(sanitize("/Über uns", &policy()), "/über-uns/");
    }

    #[test]
    fn sanitize_empty_input_is_root() {
        assert_eq!(sanitize("", &policy()), "/");
        assert_eq!(sanitize("/!!!/", &policy()), "/");
    }

    #[test]
    fn sanitize_respects_max_length() {
        let policy = SlugFieldPolicy {
            max_length: 10,
            ..SlugFieldPolicy::default()
        };
        assert_eq!(sanitize("/abcdef-ghijkl", &policy), "/abcdef-g/");
        assert_eq!(sanitize("/abcdefg-hijkl", &policy), "/abcdefg/");
        assert_eq!(sanitize("/abcdefgh", &policy), "/abcdefgh/");
    }

    #[test]
    fn sanitize_uses_configured_fallback_character() {
        let policy = SlugFieldPolicy {
            fallback_character: '_',
            ..SlugFieldPolicy::default()
        };
        assert_eq!(sanitize("About Us-Now", &policy), "/about_us_now/");
    }

    #[test]
    fn legacy_paths_are_wrapped_verbatim() {
        assert_eq!(normalize_legacy_path("company/About_Us"), "/company/About_Us/");
        assert_eq!(normalize_legacy_path("/team/"), "/team/");
        assert_eq!(normalize_legacy_path(""), "/");
    }
}
