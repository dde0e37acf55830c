//! Domain types shared by the matching engine, the pipeline and the sinks.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type QueryId = String;
pub type Meta = HashMap<String, String>;
pub type Fields = BTreeMap<String, FieldValues>;

/// A single scalar value of a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::I64(n) => write!(f, "{n}"),
            Self::F64(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self { Self::Str(s.to_string()) }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self { Self::Str(s) }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self { Self::I64(n) }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self { Self::F64(n) }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self { Self::Bool(b) }
}

/// One or more values of a field. Serialized as a scalar when single-valued.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldValues(Vec<FieldValue>);

impl FieldValues {
    pub fn new(values: Vec<FieldValue>) -> Self { Self(values) }

    pub fn first(&self) -> Option<&FieldValue> { self.0.first() }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldValue> { self.0.iter() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

macro_rules! single_value_from {
    ($($t:ty),*) => {
        $(impl From<$t> for FieldValues {
            fn from(v: $t) -> Self { Self(vec![v.into()]) }
        })*
    };
}

single_value_from!(&str, String, i64, f64, bool);

impl From<FieldValue> for FieldValues {
    fn from(v: FieldValue) -> Self { Self(vec![v]) }
}

impl From<Vec<FieldValue>> for FieldValues {
    fn from(values: Vec<FieldValue>) -> Self { Self(values) }
}

impl Serialize for FieldValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [one] => one.serialize(serializer),
            many => many.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(FieldValue),
            Many(Vec<FieldValue>),
        }
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(v) => Self(vec![v]),
            OneOrMany::Many(vs) => Self(vs),
        })
    }
}

/// A document as handed to the pipeline by the ingestion side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputDocument {
    fields: Fields,
}

impl InputDocument {
    pub fn new() -> Self { Self::default() }

    pub fn with_field(mut self, name: &str, values: impl Into<FieldValues>) -> Self {
        self.set_field(name, values);
        self
    }

    pub fn set_field(&mut self, name: &str, values: impl Into<FieldValues>) {
        self.fields.insert(name.to_string(), values.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValues> { self.fields.get(name) }

    pub fn fields(&self) -> &Fields { &self.fields }

    pub fn into_fields(self) -> Fields { self.fields }
}

impl From<Fields> for InputDocument {
    fn from(fields: Fields) -> Self { Self { fields } }
}

/// A document after schema binding: its batch identifier plus the
/// engine-specific matchable form. The original field set lives in the
/// owning [`Batch`].
#[derive(Debug, Clone)]
pub struct IngestedDocument<D> {
    pub id: String,
    pub matchable: D,
}

/// Documents collected between two ingestion boundaries.
///
/// Identifiers are unique: pushing a document whose id is already present
/// replaces the earlier one in place.
#[derive(Debug)]
pub struct Batch<D> {
    seq: u64,
    documents: Vec<IngestedDocument<D>>,
    originals: HashMap<String, Fields>,
}

impl<D> Batch<D> {
    pub fn new(seq: u64) -> Self {
        Self { seq, documents: Vec::new(), originals: HashMap::new() }
    }

    pub fn seq(&self) -> u64 { self.seq }

    /// Returns `true` when the document replaced an earlier one with the same id.
    pub fn push(&mut self, doc: IngestedDocument<D>, fields: Fields) -> bool {
        let replaced = self.originals.insert(doc.id.clone(), fields).is_some();
        if replaced {
            if let Some(slot) = self.documents.iter_mut().find(|d| d.id == doc.id) {
                *slot = doc;
                return true;
            }
        }
        self.documents.push(doc);
        replaced
    }

    pub fn len(&self) -> usize { self.documents.len() }

    pub fn is_empty(&self) -> bool { self.documents.is_empty() }

    pub fn documents(&self) -> &[IngestedDocument<D>] { &self.documents }

    pub fn original(&self, id: &str) -> Option<&Fields> { self.originals.get(id) }
}

/// A registered query evaluated against every ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingQuery {
    pub id: QueryId,
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl StandingQuery {
    pub fn new(id: impl Into<String>, name: impl Into<String>, query: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), query: query.into(), metadata: Meta::new() }
    }

    pub fn with_metadata(mut self, metadata: Meta) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Selects between plain matching and matching with field-level hits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Simple,
    Highlighting,
}

impl FromStr for MatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "highlighting" => Ok(Self::Highlighting),
            other => Err(Error::InvalidConfig(format!("unknown match mode '{other}'"))),
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => f.write_str("simple"),
            Self::Highlighting => f.write_str("highlighting"),
        }
    }
}

/// A token span inside one value of a field that caused a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HitSpan {
    pub start_position: usize,
    pub end_position: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Field name to the spans matched in that field.
pub type Hits = BTreeMap<String, Vec<HitSpan>>;

/// One (document, query) match produced by a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub doc_id: String,
    pub query_id: QueryId,
    pub hits: Option<Hits>,
}

impl MatchOutcome {
    pub fn new(doc_id: impl Into<String>, query_id: impl Into<String>) -> Self {
        Self { doc_id: doc_id.into(), query_id: query_id.into(), hits: None }
    }

    pub fn with_hits(mut self, hits: Hits) -> Self {
        self.hits = Some(hits);
        self
    }
}
