use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tantivy::collector::DocSetCollector;
use tantivy::query::Query;
use tantivy::schema::{Field, Value};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, TantivyError};

use percolate_core::error::{Error, Result};
use percolate_core::traits::MatchingEngine;
use percolate_core::types::{HitSpan, Hits, IngestedDocument, InputDocument, MatchMode, MatchOutcome, StandingQuery};

use crate::binding::SchemaBinding;
use crate::monitor::QueryMonitor;
use crate::tantivy_utils::create_ram_index;

const WRITER_MEMORY_BUDGET: usize = 50_000_000;
// Keeps phrase terms from spanning two values of a multi-valued field.
const POSITION_GAP: usize = 1;

fn engine_err(e: TantivyError) -> Error { Error::Engine(e.to_string()) }

impl MatchingEngine for QueryMonitor {
	type Doc = TantivyDocument;

	fn convert(&self, doc: &InputDocument) -> Result<IngestedDocument<TantivyDocument>> {
		self.binding().to_document(doc)
	}

	/// Indexes the batch into a throwaway in-RAM index and evaluates every
	/// registered query against it. Queries run in parallel on the current
	/// rayon pool. Outcomes come back in batch order, then query id order.
	///
	/// Every call builds a fresh index plus a single-threaded writer with a
	/// 50 MB memory budget and commits it once. That setup is a fixed cost of
	/// roughly tens of milliseconds per batch regardless of size, so batches
	/// of a handful of documents are dominated by it. Size `--batch-size`
	/// so the cost spreads over hundreds of documents.
	fn match_batch(&self, docs: &[IngestedDocument<TantivyDocument>], mode: MatchMode) -> Result<Vec<MatchOutcome>> {
		let queries = self.snapshot();
		if docs.is_empty() || queries.is_empty() { return Ok(Vec::new()); }

		let start = Instant::now();
		let batch = BatchIndex::build(self.binding(), docs)?;
		let per_query = queries
			.par_iter()
			.map(|(query, compiled)| batch.run(query, compiled.as_ref(), mode))
			.collect::<Result<Vec<_>>>()?;

		let mut matched: Vec<(usize, MatchOutcome)> = per_query.into_iter().flatten().collect();
		matched.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.query_id.cmp(&b.1.query_id)));
		tracing::debug!(docs = docs.len(), queries = queries.len(), matches = matched.len(), elapsed_ms = start.elapsed().as_millis() as u64, "batch evaluated");
		Ok(matched.into_iter().map(|(_, outcome)| outcome).collect())
	}
}

/// One batch of documents indexed for evaluation. Built once per batch and
/// dropped with it; nothing carries over between batches.
struct BatchIndex<'a> {
	index: Index,
	searcher: Searcher,
	binding: &'a SchemaBinding,
	docs: &'a [IngestedDocument<TantivyDocument>],
	positions: HashMap<&'a str, usize>,
}

impl<'a> BatchIndex<'a> {
	fn build(binding: &'a SchemaBinding, docs: &'a [IngestedDocument<TantivyDocument>]) -> Result<Self> {
		let index = create_ram_index(binding.schema().clone());
		let mut index_writer: IndexWriter = index.writer_with_num_threads(1, WRITER_MEMORY_BUDGET).map_err(engine_err)?;
		for d in docs { index_writer.add_document(d.matchable.clone()).map_err(engine_err)?; }
		index_writer.commit().map_err(engine_err)?;
		let reader: IndexReader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(engine_err)?;
		let searcher = reader.searcher();
		let positions = docs.iter().enumerate().map(|(i, d)| (d.id.as_str(), i)).collect();
		Ok(Self { index, searcher, binding, docs, positions })
	}

	fn run(&self, query: &StandingQuery, compiled: &dyn Query, mode: MatchMode) -> Result<Vec<(usize, MatchOutcome)>> {
		let addresses = self.searcher.search(compiled, &DocSetCollector).map_err(engine_err)?;
		let mut out = Vec::with_capacity(addresses.len());
		for addr in addresses {
			let stored: TantivyDocument = self.searcher.doc(addr).map_err(engine_err)?;
			let Some(id) = stored.get_first(self.binding.id_field()).and_then(|v| v.as_str()) else { continue };
			let Some(&pos) = self.positions.get(id) else { continue };
			let outcome = MatchOutcome::new(id, query.id.as_str());
			let outcome = match mode {
				MatchMode::Simple => outcome,
				MatchMode::Highlighting => outcome.with_hits(self.highlight(compiled, &self.docs[pos].matchable)?),
			};
			out.push((pos, outcome));
		}
		Ok(out)
	}

	/// Re-analyzes the document's values and reports every token equal to a
	/// term the query looks for in that field.
	fn highlight(&self, compiled: &dyn Query, doc: &TantivyDocument) -> Result<Hits> {
		let mut terms: HashMap<Field, HashSet<String>> = HashMap::new();
		compiled.query_terms(&mut |term, _| {
			if let Some(text) = term.value().as_str() {
				terms.entry(term.field()).or_default().insert(text.to_string());
			}
		});

		let mut hits = Hits::new();
		for (field, wanted) in &terms {
			if !self.binding.is_textual(*field) { continue; }
			let mut analyzer = self.index.tokenizer_for_field(*field).map_err(engine_err)?;
			let mut spans = Vec::new();
			let mut position_base = 0;
			for value in doc.get_all(*field) {
				let Some(text) = value.as_str() else { continue };
				let mut stream = analyzer.token_stream(text);
				let mut next_base = position_base;
				while stream.advance() {
					let token = stream.token();
					let position = position_base + token.position;
					next_base = position + 1 + POSITION_GAP;
					if wanted.contains(&token.text) {
						spans.push(HitSpan { start_position: position, end_position: position, start_offset: token.offset_from, end_offset: token.offset_to });
					}
				}
				position_base = next_base;
			}
			if !spans.is_empty() {
				spans.sort();
				hits.insert(self.binding.field_name(*field).to_string(), spans);
			}
		}
		Ok(hits)
	}
}
