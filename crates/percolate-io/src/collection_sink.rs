use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::blocking::Client;

use percolate_core::error::{Error, Result};
use percolate_core::record::{FieldList, ProjectedRecord, SinkPayload};
use percolate_core::traits::ResultSink;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Indexes results into a remote search collection. Each query's records are
/// posted as one JSON array to `<url>/<collection>/update`; the configured
/// URLs are tried in order until one accepts.
pub struct CollectionSink {
    name: String,
    urls: Vec<String>,
    collection: String,
    fields: FieldList,
    client: Client,
    closed: AtomicBool,
}

impl CollectionSink {
    /// `urls` is a comma separated list of base URLs.
    pub fn new(urls: &str, collection: &str, fields: FieldList) -> Result<Self> {
        let urls: Vec<String> = urls
            .split(',')
            .map(|u| u.trim().trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();
        let collection = collection.trim();
        if urls.is_empty() || collection.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "collection sink requires urls and collection, got [{}] and [{}]",
                urls.join(","),
                collection
            )));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Operation(format!("Failed to build HTTP client: {e}")))?;
        tracing::info!(collection, urls = urls.len(), fields = %fields, "collection sink ready");
        Ok(Self {
            name: format!("collection:{collection}"),
            urls,
            collection: collection.to_string(),
            fields,
            client,
            closed: AtomicBool::new(false),
        })
    }

    pub fn update_urls(&self) -> impl Iterator<Item = String> + '_ {
        self.urls.iter().map(|base| format!("{}/{}/update", base, self.collection))
    }

    fn post(&self, records: &[ProjectedRecord]) -> Result<()> {
        let mut last_error = String::new();
        for url in self.update_urls() {
            match self.client.post(&url).json(records).send() {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().unwrap_or_default();
                    last_error = format!("HTTP error {status} from {url}: {body}");
                }
                Err(e) => last_error = format!("HTTP request to {url} failed: {e}"),
            }
            tracing::debug!(collection = %self.collection, error = %last_error, "update endpoint rejected records, trying next");
        }
        Err(Error::sink(&self.name, last_error))
    }
}

impl ResultSink for CollectionSink {
    fn name(&self) -> &str { &self.name }

    fn field_list(&self) -> &FieldList { &self.fields }

    /// Posts every query group; a failed group is logged and the rest are
    /// still sent.
    fn deliver(&self, payload: &SinkPayload) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::sink(&self.name, "sink is shut down"));
        }
        let mut failed = 0;
        for (query_id, records) in payload.iter() {
            if let Err(e) = self.post(records) {
                tracing::error!(query_id, records = records.len(), collection = %self.collection, error = %e, "Failed to index query results");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(Error::sink(&self.name, format!("{} of {} query groups failed", failed, payload.len())));
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
