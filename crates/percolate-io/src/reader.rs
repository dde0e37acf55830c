use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use percolate_core::error::{Error, Result};
use percolate_core::traits::QueryReader;
use percolate_core::types::{Meta, StandingQuery};

/// One entry of a query file:
///
/// ```json
/// [{ "query_id": "1", "query_name": "mid price", "query": "q=price:[100 TO 200]" }]
/// ```
#[derive(Debug, Deserialize)]
struct QueryEntry {
    query_id: String,
    #[serde(default)]
    query_name: String,
    query: String,
}

/// Reads standing queries from a JSON file, or from every `*.json` file
/// under a directory (in path order).
#[derive(Debug, Clone)]
pub struct FileQueryReader {
    path: PathBuf,
}

impl FileQueryReader {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::NotFound(format!("query file {} doesn't exist", path.display())));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn files(&self) -> Result<Vec<PathBuf>> {
        if self.path.is_file() {
            return Ok(vec![self.path.clone()]);
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.path).follow_links(true) {
            let entry = entry.map_err(|e| Error::Operation(format!("Failed to walk {}: {}", self.path.display(), e)))?;
            let p = entry.path();
            if entry.file_type().is_file() && p.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(p.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

fn read_entries(path: &Path) -> Result<Vec<QueryEntry>> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Operation(format!("Failed to read queries from file {}: {}", path.display(), e)))
}

impl QueryReader for FileQueryReader {
    fn read_all(&self, metadata: &Meta) -> Result<Vec<StandingQuery>> {
        let mut queries = Vec::new();
        for file in self.files()? {
            let entries = read_entries(&file)?;
            tracing::debug!(file = %file.display(), queries = entries.len(), "read query file");
            queries.extend(entries.into_iter().map(|e| StandingQuery::new(e.query_id, e.query_name, e.query).with_metadata(metadata.clone())));
        }
        Ok(queries)
    }

    fn read_by_id(&self, query_id: &str, metadata: &Meta) -> Result<StandingQuery> {
        let mut found: Vec<StandingQuery> = self.read_all(metadata)?.into_iter().filter(|q| q.id == query_id).collect();
        match found.len() {
            0 => Err(Error::NotFound(format!("Query with id {} wasn't found", query_id))),
            1 => Ok(found.remove(0)),
            n => Err(Error::Operation(format!("Found {} queries with id {}", n, query_id))),
        }
    }
}
