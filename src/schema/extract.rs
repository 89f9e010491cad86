//! Schema extraction from model source files.
//!
//! Each source file is parsed with [`parse_source`]; every schema bound to a
//! `model('Name', ...)` call becomes a [`SchemaDescriptor`]. Failures never
//! abort extraction: a declaration that cannot be read is reported in
//! [`Extraction::skipped`] and left out of the snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::{Number, Value, json};

use super::parser::{DeclError, JsValue, ParsedSource, SchemaDecl, parse_source};
use super::{DefaultValue, FieldDescriptor, IndexDescriptor, IndexOptions, IndexOrder, SchemaDescriptor, Snapshot};
use crate::error::{MigrateError, Result};

const SOURCE_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "ts", "mts", "cts"];

/// One model source file.
#[derive(Debug, Clone)]
pub struct EntitySource {
    pub origin: PathBuf,
    pub text: String,
}

impl EntitySource {
    pub fn new(origin: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
        }
    }
}

/// A declaration left out of the snapshot, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntity {
    pub origin: String,
    /// Entity name, when it could be determined.
    pub entity: Option<String>,
    pub reason: String,
}

/// Result of an extraction run.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub snapshot: Snapshot,
    pub skipped: Vec<SkippedEntity>,
}

impl Extraction {
    /// The extracted snapshot with skipped entities filled in from
    /// `previous`, so an entity that failed to parse is not mistaken for a
    /// removed one.
    pub fn resolve_against(&self, previous: Option<&Snapshot>) -> Snapshot {
        let mut snapshot = self.snapshot.clone();
        let Some(previous) = previous else {
            return snapshot;
        };
        for name in self.skipped.iter().filter_map(|s| s.entity.as_deref()) {
            if snapshot.contains(name) {
                continue;
            }
            if let Some(schema) = previous.get(name) {
                tracing::debug!(entity = name, "keeping previous descriptor for skipped entity");
                snapshot.insert(schema.clone());
            }
        }
        snapshot
    }
}

/// Read every model source file in `dir`, sorted by path.
///
/// A missing directory yields no sources.
pub fn load_sources(dir: &Path) -> Result<Vec<EntitySource>> {
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "models directory does not exist");
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    collect_sources(dir, &mut paths)?;
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let text = fs::read_to_string(&path).map_err(|e| MigrateError::io(&path, e))?;
            Ok(EntitySource::new(path, text))
        })
        .collect()
}

fn collect_sources(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| MigrateError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| MigrateError::io(dir, e))?.path();
        if path.is_dir() {
            collect_sources(&path, out)?;
            continue;
        }
        let is_source = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
        let is_declaration = path.to_string_lossy().ends_with(".d.ts");
        if is_source && !is_declaration {
            out.push(path);
        }
    }
    Ok(())
}

/// Extract a snapshot from the given sources.
pub fn extract(sources: &[EntitySource]) -> Extraction {
    let mut extraction = Extraction::default();

    for source in sources {
        let origin = source.origin.display().to_string();
        let parsed = parse_source(&source.text);

        if parsed.schemas.is_empty() && parsed.errors.is_empty() {
            tracing::debug!(origin = %origin, "no schema declaration found");
            continue;
        }

        let mut failures: Vec<(Option<String>, &DeclError)> =
            parsed.errors.iter().map(|e| (None, e)).collect();

        for (name, decl) in resolve_entities(&source.origin, &parsed) {
            let mut failed = false;
            for failure in failures
                .iter_mut()
                .filter(|(_, e)| e.binding.is_some() && e.binding == decl.binding)
            {
                failure.0 = Some(name.clone());
                failed = true;
            }
            if failed {
                continue;
            }

            if extraction.snapshot.contains(&name) {
                let reason = format!("entity {} is already declared by another source", name);
                tracing::warn!(origin = %origin, "{}", reason);
                extraction.skipped.push(SkippedEntity {
                    origin: origin.clone(),
                    entity: None,
                    reason,
                });
                continue;
            }

            let schema = describe_schema(&name, decl, &parsed);
            tracing::info!(
                entity = %name,
                fields = schema.fields.len(),
                indexes = schema.indexes.len(),
                "extracted schema"
            );
            extraction.snapshot.insert(schema);
        }

        for (entity, error) in failures {
            let entity = entity.or_else(|| failed_schema_entity(&source.origin, &parsed, error));
            tracing::warn!(origin = %origin, entity = ?entity, "skipping entity: {}", error);
            extraction.skipped.push(SkippedEntity {
                origin: origin.clone(),
                entity,
                reason: error.to_string(),
            });
        }
    }

    extraction
}

/// Entity name of a schema declaration that failed to parse, if it can be
/// told from the model bindings or the file name.
fn failed_schema_entity(origin: &Path, parsed: &ParsedSource, error: &DeclError) -> Option<String> {
    if let Some(binding) = &error.binding {
        if let Some(model) = parsed
            .models
            .iter()
            .find(|m| m.binding.as_deref() == Some(binding.as_str()))
        {
            return Some(model.name.clone());
        }
    }
    if !parsed.schemas.is_empty() {
        return None;
    }
    match parsed.models.as_slice() {
        [] => Some(entity_name_from_path(origin)),
        [model] => Some(model.name.clone()),
        _ => None,
    }
}

/// Pair schema declarations with entity names.
///
/// A schema bound to `model('Name', binding)` is named by the model. A file
/// with exactly one schema and no usable model binding is named after the
/// file. Other unbound schemas are sub-documents and not entities.
fn resolve_entities<'a>(origin: &Path, parsed: &'a ParsedSource) -> Vec<(String, &'a SchemaDecl)> {
    let mut resolved = Vec::new();
    let mut unbound = Vec::new();

    for decl in &parsed.schemas {
        let model = decl.binding.as_ref().and_then(|binding| {
            parsed
                .models
                .iter()
                .find(|m| m.binding.as_deref() == Some(binding.as_str()))
        });
        match model {
            Some(model) => resolved.push((model.name.clone(), decl)),
            None => unbound.push(decl),
        }
    }

    if resolved.is_empty() && unbound.len() == 1 {
        let name = match parsed.models.as_slice() {
            [model] => model.name.clone(),
            _ => entity_name_from_path(origin),
        };
        resolved.push((name, unbound[0]));
    } else {
        for decl in unbound {
            tracing::debug!(line = decl.line, "schema without model binding treated as sub-document");
        }
    }

    resolved
}

fn entity_name_from_path(path: &Path) -> String {
    let stem = path
        .file_name()
        .and_then(|s| s.to_str())
        .and_then(|s| s.split('.').next())
        .unwrap_or("Entity");
    let mut chars = stem.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Entity".to_string(),
    }
}

fn describe_schema(name: &str, decl: &SchemaDecl, parsed: &ParsedSource) -> SchemaDescriptor {
    let fields: IndexMap<String, FieldDescriptor> = decl
        .fields
        .iter()
        .map(|(field, value)| (field.clone(), describe_field(value)))
        .collect();

    let options: BTreeMap<String, Value> = decl
        .options
        .iter()
        .map(|(key, value)| (key.clone(), to_json(value)))
        .collect();

    let mut indexes: Vec<IndexDescriptor> = Vec::new();
    if let Some(binding) = &decl.binding {
        for index in parsed.indexes.iter().filter(|i| &i.binding == binding) {
            let descriptor = describe_index(&index.fields, &index.options);
            if !descriptor.fields.is_empty() && !indexes.contains(&descriptor) {
                indexes.push(descriptor);
            }
        }
    }

    SchemaDescriptor {
        entity_name: name.to_string(),
        fields,
        options,
        indexes,
    }
}

fn describe_index(fields: &[(String, JsValue)], options: &[(String, JsValue)]) -> IndexDescriptor {
    let keys = fields
        .iter()
        .filter_map(|(field, order)| {
            let order = match order {
                JsValue::Number(n) => IndexOrder::Direction(*n as i64),
                JsValue::Str(kind) => IndexOrder::Kind(kind.clone()),
                _ => return None,
            };
            Some((field.clone(), order))
        })
        .collect();

    let unique = options
        .iter()
        .any(|(key, value)| key == "unique" && *value == JsValue::Bool(true));

    IndexDescriptor {
        fields: keys,
        options: IndexOptions { unique },
    }
}

/// Normalize a declared type name.
fn type_name(declared: &str) -> String {
    let last = declared.rsplit('.').next().unwrap_or(declared);
    match last.to_ascii_lowercase().as_str() {
        "string" => "string",
        "number" | "double" | "int32" | "long" => "number",
        "boolean" | "bool" => "boolean",
        "date" => "date",
        "objectid" => "reference",
        "mixed" => "mixed",
        "map" => "map",
        "buffer" => "buffer",
        "decimal128" | "decimal" => "decimal",
        "array" => "array",
        "object" => "object",
        other => return other.to_string(),
    }
    .to_string()
}

fn is_field_spec(entries: &[(String, JsValue)]) -> bool {
    match entries.iter().find(|(k, _)| k == "type") {
        // `{ type: { type: String } }` declares a nested field named `type`.
        Some((_, JsValue::Object(inner))) => !inner.iter().any(|(k, _)| k == "type"),
        Some(_) => true,
        None => false,
    }
}

fn describe_field(value: &JsValue) -> FieldDescriptor {
    match value {
        JsValue::Array(items) => {
            let of = items.first().map_or_else(|| "mixed".to_string(), |item| describe_field(item).field_type);
            FieldDescriptor::new("array").of(of)
        }
        JsValue::Object(entries) if is_field_spec(entries) => describe_field_spec(entries),
        JsValue::Object(_) => FieldDescriptor::new("object"),
        JsValue::Path(name) | JsValue::Str(name) => FieldDescriptor::new(type_name(name)),
        _ => FieldDescriptor::new("mixed"),
    }
}

fn describe_field_spec(entries: &[(String, JsValue)]) -> FieldDescriptor {
    let mut field = FieldDescriptor::new("mixed");

    for (key, value) in entries {
        match key.as_str() {
            "type" => {
                let typed = describe_field(value);
                field.field_type = typed.field_type;
                field.of = typed.of;
            }
            "required" => field.required = is_truthy_flag(value),
            "unique" => field.unique = is_truthy_flag(value),
            "default" => field.default = Some(to_default(value)),
            "enum" => field.allowed = enum_values(value),
            "ref" => {
                if let JsValue::Str(target) = value {
                    field.reference = Some(target.clone());
                }
            }
            _ => {}
        }
    }

    field
}

/// `true`, or `[true, 'message']`. Function-valued flags are conditional and
/// do not count.
fn is_truthy_flag(value: &JsValue) -> bool {
    match value {
        JsValue::Bool(flag) => *flag,
        JsValue::Array(items) => matches!(items.first(), Some(JsValue::Bool(true))),
        _ => false,
    }
}

fn enum_values(value: &JsValue) -> Option<Vec<Value>> {
    let items = match value {
        JsValue::Array(items) => items,
        JsValue::Object(_) => match value.get("values") {
            Some(JsValue::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };
    Some(items.iter().map(to_json).collect())
}

/// A literal only when no part of it is an expression; `{ at: Date.now }`
/// is kept as expression text.
fn to_default(value: &JsValue) -> DefaultValue {
    match value.expression_text() {
        Some(expr) => DefaultValue::expression(expr),
        None if contains_expression(value) => DefaultValue::expression(js_text(value)),
        None => DefaultValue::Literal(to_json(value)),
    }
}

fn contains_expression(value: &JsValue) -> bool {
    match value {
        JsValue::Object(entries) => entries.iter().any(|(_, v)| contains_expression(v)),
        JsValue::Array(items) => items.iter().any(contains_expression),
        other => other.expression_text().is_some(),
    }
}

/// Source-like rendering of a parsed value.
fn js_text(value: &JsValue) -> String {
    match value {
        JsValue::Object(entries) if entries.is_empty() => "{}".to_string(),
        JsValue::Object(entries) => {
            let body: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", k, js_text(v)))
                .collect();
            format!("{{ {} }}", body.join(", "))
        }
        JsValue::Array(items) => {
            let body: Vec<String> = items.iter().map(js_text).collect();
            format!("[{}]", body.join(", "))
        }
        JsValue::Str(s) => format!("{:?}", s),
        JsValue::Number(n) => number_json(*n).to_string(),
        JsValue::Bool(b) => b.to_string(),
        JsValue::Null => "null".to_string(),
        JsValue::Path(s) | JsValue::Call(s) | JsValue::Raw(s) => s.clone(),
    }
}

/// Literal JSON for a parsed value; expressions become `{"$expr": text}`.
fn to_json(value: &JsValue) -> Value {
    match value {
        JsValue::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
        JsValue::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        JsValue::Str(s) => Value::String(s.clone()),
        JsValue::Number(n) => number_json(*n),
        JsValue::Bool(b) => Value::Bool(*b),
        JsValue::Null => Value::Null,
        JsValue::Path(s) | JsValue::Call(s) | JsValue::Raw(s) => json!({ "$expr": s }),
    }
}

fn number_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WIDGET: &str = r#"
const mongoose = require('mongoose');
const { Schema } = mongoose;

const variantSchema = new Schema({ sku: String });

const widgetSchema = new Schema({
  name: { type: String, required: [true, 'name is required'], unique: true },
  price: { type: Number, default: 0 },
  status: { type: String, enum: ['draft', 'live'], default: 'draft' },
  tags: [String],
  variants: [variantSchema],
  owner: { type: Schema.Types.ObjectId, ref: 'User' },
  dims: { width: Number, height: Number },
  publishedAt: { type: Date, default: Date.now },
  slug: { type: String, required: function () { return this.live; }, lowercase: true },
}, { timestamps: true, collection: 'catalog' });

widgetSchema.index({ status: 1, name: -1 });
widgetSchema.index({ name: 'text' }, { unique: false });

module.exports = mongoose.model('Widget', widgetSchema);
"#;

    fn extract_one(text: &str) -> Extraction {
        extract(&[EntitySource::new("models/widget.js", text)])
    }

    #[test]
    fn test_extracts_fields_in_declaration_order() {
        let extraction = extract_one(WIDGET);
        assert!(extraction.skipped.is_empty());
        assert_eq!(extraction.snapshot.len(), 1);

        let widget = extraction.snapshot.get("Widget").unwrap();
        let names: Vec<&str> = widget.fields.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["name", "price", "status", "tags", "variants", "owner", "dims", "publishedAt", "slug"]
        );
        assert_eq!(widget.collection_name(), "catalog");
        assert_eq!(widget.options["timestamps"], json!(true));
    }

    #[test]
    fn test_field_attributes() {
        let extraction = extract_one(WIDGET);
        let fields = &extraction.snapshot.get("Widget").unwrap().fields;

        assert_eq!(fields["name"], FieldDescriptor::new("string").required().unique());
        assert_eq!(
            fields["price"],
            FieldDescriptor::new("number").default_value(DefaultValue::Literal(json!(0)))
        );
        assert_eq!(fields["status"].allowed, Some(vec![json!("draft"), json!("live")]));
        assert_eq!(fields["tags"], FieldDescriptor::new("array").of("string"));
        assert_eq!(fields["variants"], FieldDescriptor::new("array").of("variantschema"));
        assert_eq!(fields["owner"], FieldDescriptor::new("reference").reference("User"));
        assert_eq!(fields["dims"], FieldDescriptor::new("object"));
        assert!(fields["publishedAt"].default.as_ref().unwrap().is_clock());
        // conditional `required` does not count; unknown attributes are ignored
        assert_eq!(fields["slug"], FieldDescriptor::new("string"));
    }

    #[test]
    fn test_indexes_bound_to_schema() {
        let extraction = extract_one(WIDGET);
        let indexes = &extraction.snapshot.get("Widget").unwrap().indexes;
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name(), "status_1_name_-1");
        assert_eq!(indexes[1].fields["name"], IndexOrder::Kind("text".to_string()));
    }

    #[test]
    fn test_unbound_single_schema_named_after_file() {
        let extraction = extract(&[EntitySource::new(
            "models/invoice.model.ts",
            "export default new Schema({ total: Number });",
        )]);
        assert!(extraction.snapshot.contains("Invoice"));
    }

    #[test]
    fn test_unparseable_entity_is_skipped_not_fatal() {
        let extraction = extract(&[
            EntitySource::new("models/broken.js", "const s = new Schema({ name: String "),
            EntitySource::new(
                "models/order.js",
                "const s = new Schema({ total: Number }); model('Order', s);",
            ),
        ]);
        assert_eq!(extraction.skipped.len(), 1);
        assert_eq!(extraction.skipped[0].origin, "models/broken.js");
        assert_eq!(extraction.skipped[0].entity.as_deref(), Some("Broken"));
        assert_eq!(extraction.snapshot.len(), 1);
        assert!(extraction.snapshot.contains("Order"));
    }

    #[test]
    fn test_skipped_entity_is_not_removed() {
        let previous: Snapshot = [
            SchemaDescriptor::new("Widget").field("name", FieldDescriptor::new("string")),
            SchemaDescriptor::new("Legacy"),
        ]
        .into_iter()
        .collect();

        let extraction = extract(&[EntitySource::new(
            "models/widget.js",
            "const w = new Schema({ name: String, price: ); model('Widget', w);",
        )]);
        assert!(extraction.snapshot.is_empty());

        let current = extraction.resolve_against(Some(&previous));
        assert!(current.contains("Widget"));
        assert!(!current.contains("Legacy"));
    }

    #[test]
    fn test_bad_index_skips_its_entity() {
        let extraction = extract_one(
            "const w = new Schema({ name: String }); w.index({ name: ); model('Widget', w);",
        );
        assert!(extraction.snapshot.is_empty());
        assert_eq!(extraction.skipped.len(), 1);
        assert_eq!(extraction.skipped[0].entity.as_deref(), Some("Widget"));
    }

    #[test]
    fn test_duplicate_entity_is_skipped() {
        let src = "const s = new Schema({ total: Number }); model('Order', s);";
        let extraction = extract(&[
            EntitySource::new("models/a.js", src),
            EntitySource::new("models/b.js", src),
        ]);
        assert_eq!(extraction.snapshot.len(), 1);
        assert_eq!(extraction.skipped.len(), 1);
        assert_eq!(extraction.skipped[0].origin, "models/b.js");
    }

    #[test]
    fn test_default_with_nested_expression_is_not_literal() {
        let extraction = extract_one(
            "const s = new Schema({ meta: { type: Object, default: { at: Date.now, n: 1 } }, \
             opts: { type: Object, default: { n: 1 } } }); module.exports = model('Gadget', s);",
        );
        let fields = &extraction.snapshot.get("Gadget").unwrap().fields;
        assert_eq!(
            fields["meta"].default,
            Some(DefaultValue::expression("{ at: Date.now, n: 1 }"))
        );
        assert_eq!(fields["opts"].default, Some(DefaultValue::Literal(json!({"n": 1}))));
    }

    #[test]
    fn test_field_named_type() {
        let extraction = extract_one(
            "const s = new Schema({ kind: { type: { type: String } } }); model('Asset', s);",
        );
        let asset = extraction.snapshot.get("Asset").unwrap();
        assert_eq!(asset.fields["kind"], FieldDescriptor::new("object"));
    }

    #[test]
    fn test_load_sources_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "x").unwrap();
        fs::write(dir.path().join("b.ts"), "x").unwrap();
        fs::write(dir.path().join("types.d.ts"), "x").unwrap();
        fs::write(dir.path().join("notes.md"), "x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.mjs"), "x").unwrap();

        let sources = load_sources(dir.path()).unwrap();
        let names: Vec<String> = sources
            .iter()
            .map(|s| s.origin.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.js", "b.ts", "c.mjs"]);
    }

    #[test]
    fn test_load_sources_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_sources(&dir.path().join("absent")).unwrap().is_empty());
    }
}
