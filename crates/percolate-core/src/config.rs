//! Lightweight configuration loader, the typed percolator settings, and path
//! helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates nested keys, e.g. `APP_MATCHING__MODE=highlighting`).

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::record::{FieldList, MissingFieldPolicy};
use crate::types::MatchMode;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    /// Loads a single TOML file, still letting `APP_*` variables override it.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::InvalidConfig(format!("config file {} doesn't exist", path.display())));
        }
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    pub fn from_toml_str(toml: &str) -> Self {
        Self { figment: Figment::new().merge(Toml::string(toml)) }
    }

    /// Extracts and validates the full percolator configuration.
    pub fn percolator(&self) -> Result<PercolatorConfig> {
        let config: PercolatorConfig = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PercolatorConfig {
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    pub reader: Option<ReaderConfig>,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default)]
    pub mode: MatchMode,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self { Self { mode: MatchMode::default(), workers: default_workers() } }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Tokenized, positions indexed; eligible for hits.
    Text,
    /// Indexed as a single raw token.
    String,
    I64,
    F64,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: &str, kind: FieldKind) -> Self { Self { name: name.to_string(), kind } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_version_field")]
    pub version_field: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self { id_field: default_id_field(), version_field: default_version_field(), fields: Vec::new() }
    }
}

fn default_id_field() -> String { "id".to_string() }

fn default_version_field() -> String { "_version_".to_string() }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default)]
    pub missing_fields: MissingFieldPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    File {
        path: String,
        fields: FieldList,
    },
    Collection {
        /// Comma separated base URLs, tried in order.
        urls: String,
        collection: String,
        fields: FieldList,
    },
}

impl SinkConfig {
    pub fn fields(&self) -> &FieldList {
        match self {
            Self::File { fields, .. } | Self::Collection { fields, .. } => fields,
        }
    }
}

impl PercolatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.matching.workers == 0 {
            return Err(Error::InvalidConfig("matching.workers must be > 0".into()));
        }
        self.schema.validate()?;
        if self.sinks.is_empty() {
            return Err(Error::InvalidConfig("at least one sink must be configured".into()));
        }
        for sink in &self.sinks {
            match sink {
                SinkConfig::File { path, .. } if path.trim().is_empty() => {
                    return Err(Error::InvalidConfig("file sink requires a path".into()));
                }
                SinkConfig::Collection { urls, collection, .. }
                    if urls.split(',').all(|u| u.trim().is_empty()) || collection.trim().is_empty() =>
                {
                    return Err(Error::InvalidConfig(format!(
                        "collection sink requires urls and collection, got [{}] and [{}]",
                        urls, collection
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl SchemaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.id_field.trim().is_empty() {
            return Err(Error::InvalidConfig("schema.id_field must not be empty".into()));
        }
        if self.id_field == self.version_field {
            return Err(Error::InvalidConfig("schema.id_field and schema.version_field must differ".into()));
        }
        if self.fields.is_empty() {
            return Err(Error::InvalidConfig("schema.fields must declare at least one field".into()));
        }
        let mut seen = HashSet::new();
        for f in &self.fields {
            if !seen.insert(f.name.as_str()) {
                return Err(Error::InvalidConfig(format!("schema field '{}' declared twice", f.name)));
            }
            if f.name == self.version_field {
                return Err(Error::InvalidConfig(format!("'{}' is reserved for the version marker", f.name)));
            }
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
