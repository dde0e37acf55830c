use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Failed to convert document {doc_id}: {reason}")]
    Conversion { doc_id: String, reason: String },

    #[error("Failed to compile query {query_id}: {reason}")]
    QueryParse { query_id: String, reason: String },

    #[error("Matching engine failure: {0}")]
    Engine(String),

    #[error("Sink {sink} failed: {reason}")]
    Sink { sink: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn conversion(doc_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conversion { doc_id: doc_id.into(), reason: reason.into() }
    }

    pub fn sink(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Sink { sink: sink.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
