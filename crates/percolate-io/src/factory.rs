use std::path::Path;
use std::sync::Arc;

use percolate_core::config::{resolve_with_base, ReaderConfig, SinkConfig};
use percolate_core::error::Result;
use percolate_core::traits::ResultSink;

use crate::collection_sink::CollectionSink;
use crate::file_sink::FileSink;
use crate::reader::FileQueryReader;

/// Builds the configured sinks in order. Relative file paths resolve against `base`.
pub fn build_sinks(configs: &[SinkConfig], base: &Path) -> Result<Vec<Arc<dyn ResultSink>>> {
    configs
        .iter()
        .map(|config| {
            let sink: Arc<dyn ResultSink> = match config {
                SinkConfig::File { path, fields } => Arc::new(FileSink::create(resolve_with_base(base, path), fields.clone())?),
                SinkConfig::Collection { urls, collection, fields } => Arc::new(CollectionSink::new(urls, collection, fields.clone())?),
            };
            Ok(sink)
        })
        .collect()
}

pub fn build_reader(config: &ReaderConfig, base: &Path) -> Result<FileQueryReader> {
    FileQueryReader::new(resolve_with_base(base, &config.path))
}
