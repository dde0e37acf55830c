//! Projection vocabulary: sink field lists, projected records and the grouped
//! payload a sink receives once per batch.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{FieldValues, QueryId};

pub const QUERY_ID_FIELD: &str = "queryid_s";
pub const QUERY_TEXT_FIELD: &str = "query_s";
pub const HITS_FIELD: &str = "hits_s";
pub const WILDCARD: &str = "*";

pub fn is_synthetic_field(name: &str) -> bool {
    matches!(name, QUERY_ID_FIELD | QUERY_TEXT_FIELD | HITS_FIELD)
}

/// Fields a sink wants in each projected record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldList {
    All,
    Named(Vec<String>),
}

impl FieldList {
    /// Parses a comma separated list. Any `*` entry selects every field.
    pub fn parse(list: &str) -> Result<Self> {
        let names: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Err(Error::InvalidConfig(format!("field list '{list}' names no fields")));
        }
        if names.iter().any(|n| n == WILDCARD) {
            return Ok(Self::All);
        }
        Ok(Self::Named(names))
    }

    pub fn is_wildcard(&self) -> bool { matches!(self, Self::All) }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(names) => names.iter().any(|n| n == name),
        }
    }
}

impl TryFrom<String> for FieldList {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> { Self::parse(&s) }
}

impl From<FieldList> for String {
    fn from(fl: FieldList) -> Self { fl.to_string() }
}

impl fmt::Display for FieldList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(WILDCARD),
            Self::Named(names) => f.write_str(&names.join(",")),
        }
    }
}

/// What to do with a requested field the document does not carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFieldPolicy {
    /// Leave the field out of the record.
    #[default]
    Omit,
    /// Emit the field with a null value.
    Null,
}

/// The minimal record a sink receives for one match.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRecord {
    fields: BTreeMap<String, Option<FieldValues>>,
    query_id: QueryId,
    query: String,
    hits: Option<String>,
}

impl ProjectedRecord {
    pub fn new(query_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self { fields: BTreeMap::new(), query_id: query_id.into(), query: query.into(), hits: None }
    }

    pub fn insert_field(&mut self, name: &str, value: Option<FieldValues>) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn set_hits(&mut self, hits: String) { self.hits = Some(hits); }

    pub fn query_id(&self) -> &str { &self.query_id }

    pub fn query(&self) -> &str { &self.query }

    pub fn hits(&self) -> Option<&str> { self.hits.as_deref() }

    /// Value of a copied source field; `None` for absent and null fields.
    pub fn get(&self, name: &str) -> Option<&FieldValues> {
        self.fields.get(name).and_then(Option::as_ref)
    }

    pub fn contains_field(&self, name: &str) -> bool { self.fields.contains_key(name) }

    /// Names of the copied source fields, synthetic fields excluded.
    pub fn field_names(&self) -> impl Iterator<Item = &str> { self.fields.keys().map(String::as_str) }
}

impl Serialize for ProjectedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = self.fields.len() + 2 + usize::from(self.hits.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry(QUERY_ID_FIELD, &self.query_id)?;
        map.serialize_entry(QUERY_TEXT_FIELD, &self.query)?;
        if let Some(hits) = &self.hits {
            map.serialize_entry(HITS_FIELD, hits)?;
        }
        map.end()
    }
}

/// Records for one sink and one batch, grouped by matched query id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SinkPayload {
    by_query: BTreeMap<QueryId, Vec<ProjectedRecord>>,
}

impl SinkPayload {
    pub fn new() -> Self { Self::default() }

    /// Appends the record under its own query id.
    pub fn push(&mut self, record: ProjectedRecord) {
        self.by_query.entry(record.query_id.clone()).or_default().push(record);
    }

    pub fn get(&self, query_id: &str) -> Option<&[ProjectedRecord]> {
        self.by_query.get(query_id).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ProjectedRecord])> {
        self.by_query.iter().map(|(q, records)| (q.as_str(), records.as_slice()))
    }

    pub fn query_ids(&self) -> impl Iterator<Item = &str> { self.by_query.keys().map(String::as_str) }

    /// Number of distinct queries in the payload.
    pub fn len(&self) -> usize { self.by_query.len() }

    pub fn is_empty(&self) -> bool { self.by_query.is_empty() }

    pub fn record_count(&self) -> usize { self.by_query.values().map(Vec::len).sum() }
}
