use tantivy::schema::{Schema, TextFieldIndexing, TextOptions, IndexRecordOption, FAST, INDEXED, STRING, STORED};
use tantivy::tokenizer::{TextAnalyzer, SimpleTokenizer, LowerCaser, StopWordFilter};
use tantivy::Index;

use percolate_core::config::{FieldKind, SchemaConfig};

pub const TEXT_TOKENIZER: &str = "text_with_stopwords";

/// Builds the tantivy schema for a configured document shape. The id field is
/// always a stored raw string; the version marker never reaches the index.
pub fn build_schema(config: &SchemaConfig) -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field(&config.id_field, STRING | STORED);
	for def in config.fields.iter().filter(|f| f.name != config.id_field) {
		match def.kind {
			FieldKind::Text => {
				let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TEXT_TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
				let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
				schema_builder.add_text_field(&def.name, text_options);
			}
			FieldKind::String => { schema_builder.add_text_field(&def.name, STRING | STORED); }
			FieldKind::I64 => { schema_builder.add_i64_field(&def.name, INDEXED | STORED | FAST); }
			FieldKind::F64 => { schema_builder.add_f64_field(&def.name, INDEXED | STORED | FAST); }
			FieldKind::Bool => { schema_builder.add_bool_field(&def.name, INDEXED | STORED | FAST); }
		}
	}
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let stop_words = vec![
		"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
	];
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(TEXT_TOKENIZER, tokenizer);
}

/// An empty in-RAM index over `schema` with the text analyzer registered.
pub fn create_ram_index(schema: Schema) -> Index {
	let index = Index::create_in_ram(schema);
	register_tokenizer(&index);
	index
}
