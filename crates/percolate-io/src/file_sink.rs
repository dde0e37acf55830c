use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use percolate_core::error::{Error, Result};
use percolate_core::record::{FieldList, SinkPayload};
use percolate_core::traits::ResultSink;

/// Appends one JSON line per delivered payload. The file is truncated when
/// the sink is created.
pub struct FileSink {
    name: String,
    path: PathBuf,
    fields: FieldList,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileSink {
    pub fn create(path: impl Into<PathBuf>, fields: FieldList) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        tracing::info!(path = %path.display(), fields = %fields, "file sink opened");
        Ok(Self {
            name: format!("file:{}", path.display()),
            path,
            fields,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl ResultSink for FileSink {
    fn name(&self) -> &str { &self.name }

    fn field_list(&self) -> &FieldList { &self.fields }

    fn deliver(&self, payload: &SinkPayload) -> Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = guard.as_mut() else {
            return Err(Error::sink(&self.name, "sink is shut down"));
        };
        serde_json::to_writer(&mut *writer, payload)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            writer.flush()?;
            tracing::debug!(path = %self.path.display(), "file sink closed");
        }
        Ok(())
    }
}
