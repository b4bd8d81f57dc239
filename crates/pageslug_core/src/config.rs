use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::BackfillError;

pub const DEFAULT_TABLE: &str = "pages";
pub const DEFAULT_FIELD: &str = "slug";
pub const DEFAULT_MAX_LENGTH: usize = 2048;
/// Smallest limit that still holds a suffixed slug such as `/a-10/`.
pub const MIN_MAX_LENGTH: usize = 6;
pub const DEFAULT_FALLBACK_CHARACTER: char = '-';

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SlugConfig {
    #[serde(default)]
    pub backfill: BackfillSection,
    /// Field configuration keyed by table, then by field.
    #[serde(default)]
    pub fields: BTreeMap<String, BTreeMap<String, SlugFieldConfig>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BackfillSection {
    pub table: Option<String>,
    pub field: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SlugFieldConfig {
    #[serde(default)]
    pub unique_in_site: bool,
    #[serde(default)]
    pub unique_in_pid: bool,
    pub max_length: Option<usize>,
    pub fallback_character: Option<String>,
    #[serde(default)]
    pub generator_fields: Vec<String>,
}

/// Resolved uniqueness and formatting rules for one slug field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugFieldPolicy {
    pub unique_in_site: bool,
    pub unique_in_pid: bool,
    pub max_length: usize,
    pub fallback_character: char,
    pub generator_fields: Vec<String>,
}

impl Default for SlugFieldPolicy {
    fn default() -> Self {
        Self {
            unique_in_site: false,
            unique_in_pid: false,
            max_length: DEFAULT_MAX_LENGTH,
            fallback_character: DEFAULT_FALLBACK_CHARACTER,
            generator_fields: vec!["nav_title".to_string(), "title".to_string()],
        }
    }
}

impl SlugConfig {
    /// Resolve the backfilled table: env PAGESLUG_TABLE > config > DEFAULT_TABLE.
    pub fn table(&self) -> String {
        self.table_with_lookup(|key| env::var(key).ok())
    }

    /// Resolve the slug field: env PAGESLUG_FIELD > config > DEFAULT_FIELD.
    pub fn field(&self) -> String {
        self.field_with_lookup(|key| env::var(key).ok())
    }

    fn table_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        resolve_setting(
            lookup_env("PAGESLUG_TABLE"),
            self.backfill.table.as_deref(),
            DEFAULT_TABLE,
        )
    }

    fn field_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        resolve_setting(
            lookup_env("PAGESLUG_FIELD"),
            self.backfill.field.as_deref(),
            DEFAULT_FIELD,
        )
    }

    /// Policy for `table.field`; a missing or malformed entry is a configuration error.
    pub fn policy_for(&self, table: &str, field: &str) -> Result<SlugFieldPolicy, BackfillError> {
        let entry = self
            .fields
            .get(table)
            .and_then(|fields| fields.get(field))
            .ok_or_else(|| {
                BackfillError::Configuration(format!("no [fields.{table}.{field}] section"))
            })?;
        entry.to_policy(table, field)
    }
}

impl SlugFieldConfig {
    fn to_policy(&self, table: &str, field: &str) -> Result<SlugFieldPolicy, BackfillError> {
        let defaults = SlugFieldPolicy::default();
        let max_length = self.max_length.unwrap_or(defaults.max_length);
        if max_length < MIN_MAX_LENGTH {
            return Err(BackfillError::Configuration(format!(
                "fields.{table}.{field}.max_length must be at least {MIN_MAX_LENGTH}, got {max_length}"
            )));
        }

        let fallback_character = match self.fallback_character.as_deref() {
            None => defaults.fallback_character,
            Some(value) => {
                let mut chars = value.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) if ch != '/' && !ch.is_alphanumeric() => ch,
                    _ => {
                        return Err(BackfillError::Configuration(format!(
                            "fields.{table}.{field}.fallback_character must be a single non-alphanumeric character other than '/', got {value:?}"
                        )));
                    }
                }
            }
        };

        let generator_fields = if self.generator_fields.is_empty() {
            defaults.generator_fields
        } else {
            self.generator_fields.clone()
        };

        Ok(SlugFieldPolicy {
            unique_in_site: self.unique_in_site,
            unique_in_pid: self.unique_in_pid,
            max_length,
            fallback_character,
            generator_fields,
        })
    }
}

fn resolve_setting(from_env: Option<String>, configured: Option<&str>, default: &str) -> String {
    from_env
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| configured.map(str::trim).filter(|value| !value.is_empty()))
        .unwrap_or(default)
        .to_string()
}

/// Load and parse a SlugConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SlugConfig> {
    if !config_path.exists() {
        return Ok(SlugConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SlugConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_fields() {
        let config = SlugConfig::default();
        assert!(config.fields.is_empty());
        let error = config.policy_for("pages", "slug").expect_err("must fail");
        assert!(matches!(error, BackfillError::Configuration(_)));
        assert!(error.to_string().contains("[fields.pages.slug]"));
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert!(config.fields.is_empty());
        assert!(config.backfill.table.is_none());
    }

    #[test]
    fn load_config_parses_field_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[backfill]
table = "pages"
field = "slug"

[fields.pages.slug]
unique_in_site = true
max_length = 255
fallback_character = "_"
generator_fields = ["title"]
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.backfill.table.as_deref(), Some("pages"));
        let policy = config.policy_for("pages", "slug").expect("policy");
        assert!(policy.unique_in_site);
        assert!(!policy.unique_in_pid);
        assert_eq!(policy.max_length, 255);
        assert_eq!(policy.fallback_character, '_');
        assert_eq!(policy.generator_fields, vec!["title".to_string()]);
    }

    #[test]
    fn policy_defaults_fill_unset_keys() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[fields.pages.slug]\nunique_in_pid = true\n")
            .expect("write config");

        let policy = load_config(&config_path)
            .expect("load config")
            .policy_for("pages", "slug")
            .expect("policy");
        assert!(policy.unique_in_pid);
        assert_eq!(policy.max_length, DEFAULT_MAX_LENGTH);
        assert_eq!(policy.fallback_character, '-');
        assert_eq!(policy.generator_fields, vec!["nav_title", "title"]);
    }

    #[test]
    fn policy_rejects_bad_fallback_character() {
        let entry = SlugFieldConfig {
            fallback_character: Some("ab".to_string()),
            ..SlugFieldConfig::default()
        };
        let error = entry.to_policy("pages", "slug").expect_err("must fail");
        assert!(error.to_string().contains("fallback_character"));

        let entry = SlugFieldConfig {
            fallback_character: Some("/".to_string()),
            ..SlugFieldConfig::default()
        };
        assert!(entry.to_policy("pages", "slug").is_err());
    }

    #[test]
    fn policy_rejects_max_length_without_room_for_suffix() {
        for max_length in [2, 4, MIN_MAX_LENGTH - 1] {
            let entry = SlugFieldConfig {
                max_length: Some(max_length),
                ..SlugFieldConfig::default()
            };
            let error = entry.to_policy("pages", "slug").expect_err("must fail");
            assert!(error.to_string().contains("max_length"));
        }

        let entry = SlugFieldConfig {
            max_length: Some(MIN_MAX_LENGTH),
            ..SlugFieldConfig::default()
        };
        assert_eq!(
            entry.to_policy("pages", "slug").expect("policy").max_length,
            MIN_MAX_LENGTH
        );
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[fields\nunique_in_site = true").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn default_target_is_pages_slug() {
        let config = SlugConfig::default();
        assert_eq!(config.table_with_lookup(|_| None), "pages");
        assert_eq!(config.field_with_lookup(|_| None), "slug");
    }

    #[test]
    fn target_prefers_env_over_config_over_default() {
        let config = SlugConfig {
            backfill: BackfillSection {
                table: Some("content".to_string()),
                field: None,
            },
            ..SlugConfig::default()
        };
        let lookup = |key: &str| match key {
            "PAGESLUG_TABLE" => Some(" articles ".to_string()),
            "PAGESLUG_FIELD" => Some("url_path".to_string()),
            _ => None,
        };

        assert_eq!(config.table_with_lookup(lookup), "articles");
        assert_eq!(config.field_with_lookup(lookup), "url_path");
        assert_eq!(config.table_with_lookup(|_| None), "content");
        assert_eq!(config.field_with_lookup(|_| None), "slug");
        assert_eq!(
            config.table_with_lookup(|_| Some("   ".to_string())),
            "content"
        );
    }
}
