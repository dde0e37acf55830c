use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tantivy::query::{Query, QueryParser};
use tantivy::Index;

use percolate_core::config::SchemaConfig;
use percolate_core::error::{Error, Result};
use percolate_core::traits::QueryRegistry;
use percolate_core::types::StandingQuery;

use crate::binding::SchemaBinding;
use crate::tantivy_utils::create_ram_index;

pub(crate) type CompiledQuery = (Arc<StandingQuery>, Arc<dyn Query>);

/// The query registry: standing queries compiled against the document schema.
///
/// Reads take the lock only long enough to copy out `Arc`s, so registration
/// and removal may run while batches are being matched.
pub struct QueryMonitor {
	binding: SchemaBinding,
	parser_index: Index,
	queries: RwLock<HashMap<String, CompiledQuery>>,
}

impl QueryMonitor {
	pub fn new(schema: &SchemaConfig) -> Result<Self> {
		let binding = SchemaBinding::new(schema)?;
		let parser_index = create_ram_index(binding.schema().clone());
		Ok(Self { binding, parser_index, queries: RwLock::new(HashMap::new()) })
	}

	pub fn binding(&self) -> &SchemaBinding { &self.binding }

	/// Compiles and stores `query`, returning the query it replaced.
	pub fn register(&self, query: StandingQuery) -> Result<Option<Arc<StandingQuery>>> {
		let compiled = self.compile(&query)?;
		let id = query.id.clone();
		let previous = self.queries.write().unwrap_or_else(PoisonError::into_inner).insert(id.clone(), (Arc::new(query), compiled));
		tracing::debug!(query_id = %id, replaced = previous.is_some(), "registered standing query");
		Ok(previous.map(|(q, _)| q))
	}

	/// Registers every query that compiles; the failures are returned.
	pub fn register_all(&self, queries: impl IntoIterator<Item = StandingQuery>) -> Vec<Error> {
		let mut errors = Vec::new();
		for query in queries {
			if let Err(e) = self.register(query) {
				tracing::warn!(error = %e, "skipping standing query");
				errors.push(e);
			}
		}
		errors
	}

	pub fn remove(&self, query_id: &str) -> Option<Arc<StandingQuery>> {
		self.queries.write().unwrap_or_else(PoisonError::into_inner).remove(query_id).map(|(q, _)| q)
	}

	pub fn clear(&self) {
		self.queries.write().unwrap_or_else(PoisonError::into_inner).clear();
	}

	/// All registered queries ordered by id.
	pub fn queries(&self) -> Vec<Arc<StandingQuery>> {
		self.snapshot().into_iter().map(|(q, _)| q).collect()
	}

	pub(crate) fn snapshot(&self) -> Vec<CompiledQuery> {
		let guard = self.queries.read().unwrap_or_else(PoisonError::into_inner);
		let mut out: Vec<CompiledQuery> = guard.values().map(|(q, c)| (q.clone(), c.clone())).collect();
		drop(guard);
		out.sort_by(|a, b| a.0.id.cmp(&b.0.id));
		out
	}

	fn compile(&self, query: &StandingQuery) -> Result<Arc<dyn Query>> {
		let text = query.query.trim();
		// Query files may carry request-parameter style text.
		let text = text.strip_prefix("q=").unwrap_or(text).trim();
		if query.id.trim().is_empty() {
			return Err(Error::QueryParse { query_id: query.id.clone(), reason: "empty query id".into() });
		}
		if text.is_empty() {
			return Err(Error::QueryParse { query_id: query.id.clone(), reason: "empty query text".into() });
		}
		let parser = QueryParser::for_index(&self.parser_index, self.binding.default_fields());
		let parsed = parser.parse_query(text).map_err(|e| Error::QueryParse { query_id: query.id.clone(), reason: e.to_string() })?;
		Ok(Arc::from(parsed))
	}
}

impl QueryRegistry for QueryMonitor {
	type Engine = Self;

	fn engine(&self) -> &Self { self }

	fn query_count(&self) -> usize {
		self.queries.read().unwrap_or_else(PoisonError::into_inner).len()
	}

	fn lookup(&self, query_id: &str) -> Option<Arc<StandingQuery>> {
		self.queries.read().unwrap_or_else(PoisonError::into_inner).get(query_id).map(|(q, _)| q.clone())
	}

	fn list(&self) -> Vec<Arc<StandingQuery>> { self.queries() }
}
