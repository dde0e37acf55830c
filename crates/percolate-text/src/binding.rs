use std::collections::HashMap;
use tantivy::schema::{Field, Schema};
use tantivy::TantivyDocument;

use percolate_core::config::{FieldKind, SchemaConfig};
use percolate_core::error::{Error, Result};
use percolate_core::types::{FieldValue, FieldValues, IngestedDocument, InputDocument};

use crate::tantivy_utils::build_schema;

/// Maps input documents onto the tantivy schema built from [`SchemaConfig`].
pub struct SchemaBinding {
	schema: Schema,
	id_name: String,
	id_field: Field,
	version_name: String,
	fields: HashMap<String, (Field, FieldKind)>,
}

impl SchemaBinding {
	pub fn new(config: &SchemaConfig) -> Result<Self> {
		config.validate()?;
		let schema = build_schema(config);
		let id_field = schema.get_field(&config.id_field).map_err(|e| Error::InvalidConfig(e.to_string()))?;
		let mut fields = HashMap::new();
		for def in config.fields.iter().filter(|f| f.name != config.id_field) {
			let field = schema.get_field(&def.name).map_err(|e| Error::InvalidConfig(e.to_string()))?;
			fields.insert(def.name.clone(), (field, def.kind));
		}
		Ok(Self { schema, id_name: config.id_field.clone(), id_field, version_name: config.version_field.clone(), fields })
	}

	pub fn schema(&self) -> &Schema { &self.schema }

	pub fn id_field(&self) -> Field { self.id_field }

	/// Tokenized fields; unqualified query terms search these.
	pub fn default_fields(&self) -> Vec<Field> {
		let mut fields: Vec<Field> = self.fields.values().filter(|(_, kind)| *kind == FieldKind::Text).map(|(f, _)| *f).collect();
		fields.sort();
		fields
	}

	/// Whether hits can be reported for `field` (text and raw string fields).
	pub fn is_textual(&self, field: Field) -> bool {
		field == self.id_field || self.fields.values().any(|(f, kind)| *f == field && matches!(kind, FieldKind::Text | FieldKind::String))
	}

	pub fn field_name(&self, field: Field) -> &str { self.schema.get_field_name(field) }

	/// Converts an input document. Unknown fields and values that do not fit
	/// the declared field type reject the whole document.
	pub fn to_document(&self, doc: &InputDocument) -> Result<IngestedDocument<TantivyDocument>> {
		let id = self.extract_id(doc)?;
		let mut tantivy_doc = TantivyDocument::new();
		tantivy_doc.add_text(self.id_field, &id);
		for (name, values) in doc.fields() {
			if *name == self.id_name || *name == self.version_name { continue; }
			let Some(&(field, kind)) = self.fields.get(name) else {
				return Err(Error::conversion(&id, format!("unknown field '{}'", name)));
			};
			for value in values.iter() {
				add_value(&mut tantivy_doc, field, kind, value).map_err(|reason| Error::conversion(&id, format!("field '{}' {}", name, reason)))?;
			}
		}
		Ok(IngestedDocument { id, matchable: tantivy_doc })
	}

	fn extract_id(&self, doc: &InputDocument) -> Result<String> {
		let values = doc.get(&self.id_name).ok_or_else(|| Error::conversion("<unknown>", format!("missing id field '{}'", self.id_name)))?;
		match values.iter().as_slice() {
			[FieldValue::Str(s)] if !s.trim().is_empty() => Ok(s.clone()),
			[FieldValue::I64(n)] => Ok(n.to_string()),
			_ => Err(Error::conversion("<unknown>", format!("id field '{}' must hold exactly one non-empty value, got {}", self.id_name, describe(values)))),
		}
	}
}

fn add_value(doc: &mut TantivyDocument, field: Field, kind: FieldKind, value: &FieldValue) -> std::result::Result<(), String> {
	match (kind, value) {
		(FieldKind::Text | FieldKind::String, v) => doc.add_text(field, v.to_string()),
		(FieldKind::I64, FieldValue::I64(n)) => doc.add_i64(field, *n),
		(FieldKind::I64, FieldValue::Str(s)) => doc.add_i64(field, s.trim().parse().map_err(|_| format!("expects i64, got '{}'", s))?),
		(FieldKind::F64, FieldValue::F64(x)) => doc.add_f64(field, *x),
		(FieldKind::F64, FieldValue::I64(n)) => doc.add_f64(field, *n as f64),
		(FieldKind::F64, FieldValue::Str(s)) => doc.add_f64(field, s.trim().parse().map_err(|_| format!("expects f64, got '{}'", s))?),
		(FieldKind::Bool, FieldValue::Bool(b)) => doc.add_bool(field, *b),
		(FieldKind::Bool, FieldValue::Str(s)) => doc.add_bool(field, s.trim().parse().map_err(|_| format!("expects bool, got '{}'", s))?),
		(kind, v) => return Err(format!("expects {:?}, got '{}'", kind, v)),
	}
	Ok(())
}

fn describe(values: &FieldValues) -> String {
	let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
	format!("[{}]", parts.join(", "))
}
