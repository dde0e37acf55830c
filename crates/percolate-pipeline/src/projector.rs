use percolate_core::config::{PercolatorConfig, SchemaConfig};
use percolate_core::record::{is_synthetic_field, FieldList, MissingFieldPolicy, ProjectedRecord};
use percolate_core::types::{Fields, Hits, MatchOutcome};

#[derive(Debug, Clone)]
pub struct ProjectionOptions {
    /// Internal version marker, never copied by a wildcard list.
    pub version_field: String,
    pub missing_fields: MissingFieldPolicy,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self { version_field: SchemaConfig::default().version_field, missing_fields: MissingFieldPolicy::default() }
    }
}

impl ProjectionOptions {
    pub fn from_config(config: &PercolatorConfig) -> Self {
        Self { version_field: config.schema.version_field.clone(), missing_fields: config.projection.missing_fields }
    }
}

/// Builds the record a sink receives for one match. Pure: the same inputs
/// always give an equal record.
pub fn project(
    outcome: &MatchOutcome,
    field_list: &FieldList,
    original: &Fields,
    query_text: &str,
    options: &ProjectionOptions,
) -> ProjectedRecord {
    let mut record = ProjectedRecord::new(outcome.query_id.as_str(), query_text);
    match field_list {
        FieldList::All => {
            for (name, values) in original {
                if *name == options.version_field || is_synthetic_field(name) { continue; }
                record.insert_field(name, Some(values.clone()));
            }
        }
        FieldList::Named(names) => {
            for name in names {
                // synthetic names are always written by the record itself
                if is_synthetic_field(name) { continue; }
                match original.get(name) {
                    Some(values) => record.insert_field(name, Some(values.clone())),
                    None if options.missing_fields == MissingFieldPolicy::Null => record.insert_field(name, None),
                    None => {}
                }
            }
        }
    }
    if let Some(hits) = &outcome.hits {
        record.set_hits(encode_hits(hits));
    }
    record
}

/// JSON text of a hit set, e.g. `{"name":[{"start_position":0,...}]}`.
/// An empty set encodes as `{}`.
pub fn encode_hits(hits: &Hits) -> String {
    serde_json::to_string(hits).unwrap_or_else(|_| "{}".to_string())
}
