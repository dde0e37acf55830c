//! percolate-io
//!
//! Query sources and result sinks: a JSON query file reader, a JSON-lines
//! file sink and an HTTP collection sink.

pub mod collection_sink;
pub mod factory;
pub mod file_sink;
pub mod reader;

pub use collection_sink::CollectionSink;
pub use factory::{build_reader, build_sinks};
pub use file_sink::FileSink;
pub use reader::FileQueryReader;
