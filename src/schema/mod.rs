//! Schema descriptors tracked across snapshots.
//!
//! A [`Snapshot`] maps entity names to [`SchemaDescriptor`]s. Descriptors are
//! value objects: extraction always builds fresh ones and nothing mutates a
//! descriptor once it sits in a snapshot.
//!
//! ```
//! use docshift::schema::{FieldDescriptor, IndexDescriptor, SchemaDescriptor, Snapshot};
//!
//! let widget = SchemaDescriptor::new("Widget")
//!     .field("name", FieldDescriptor::new("string").required())
//!     .field("price", FieldDescriptor::new("number"))
//!     .index(IndexDescriptor::ascending(["name"]).unique());
//!
//! let mut snapshot = Snapshot::new();
//! snapshot.insert(widget);
//! assert_eq!(snapshot.get("Widget").unwrap().collection_name(), "widgets");
//! ```

mod diff;
mod extract;
pub mod parser;

pub use diff::{EntityDiff, FieldChange, SchemaDiff, diff_snapshots};
pub use extract::{EntitySource, Extraction, SkippedEntity, extract, load_sources};

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Full set of entity schemas at one point in time.
///
/// Serialized as a JSON object keyed by entity name, sorted, so snapshot
/// files diff cleanly under version control.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entities: BTreeMap<String, SchemaDescriptor>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: SchemaDescriptor) -> Option<SchemaDescriptor> {
        self.entities.insert(schema.entity_name.clone(), schema)
    }

    pub fn get(&self, entity: &str) -> Option<&SchemaDescriptor> {
        self.entities.get(entity)
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in name order.
    pub fn entities(&self) -> impl Iterator<Item = &SchemaDescriptor> {
        self.entities.values()
    }
}

impl FromIterator<SchemaDescriptor> for Snapshot {
    fn from_iter<I: IntoIterator<Item = SchemaDescriptor>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for schema in iter {
            snapshot.insert(schema);
        }
        snapshot
    }
}

/// Structural description of one persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    pub entity_name: String,
    /// Fields in declaration order.
    pub fields: IndexMap<String, FieldDescriptor>,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

impl SchemaDescriptor {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            fields: IndexMap::new(),
            options: BTreeMap::new(),
            indexes: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    /// Storage collection backing this entity.
    ///
    /// An explicit `collection` option wins; otherwise the lower-cased entity
    /// name is pluralized the way Mongoose names collections.
    pub fn collection_name(&self) -> String {
        if let Some(Value::String(name)) = self.options.get("collection") {
            return name.clone();
        }
        pluralize(&self.entity_name.to_lowercase())
    }
}

fn pluralize(word: &str) -> String {
    let consonant_y = word.ends_with('y')
        && !word.ends_with("ay")
        && !word.ends_with("ey")
        && !word.ends_with("oy")
        && !word.ends_with("uy");
    if consonant_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| word.ends_with(s)) {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}

/// Structural attributes of one declared field.
///
/// Two descriptors are the same field shape iff their serialized forms are
/// byte-identical; see [`FieldDescriptor::same_shape`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    /// Target entity of a reference field.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Element type of an array field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub of: Option<String>,
}

impl FieldDescriptor {
    pub fn new(field_type: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            required: false,
            unique: false,
            default: None,
            allowed: None,
            reference: None,
            of: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn allowed(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }

    pub fn reference(mut self, target: impl Into<String>) -> Self {
        self.reference = Some(target.into());
        self
    }

    pub fn of(mut self, element_type: impl Into<String>) -> Self {
        self.of = Some(element_type.into());
        self
    }

    /// Serialized form used for equality during diffing.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn same_shape(&self, other: &FieldDescriptor) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field_type)?;
        if let Some(of) = &self.of {
            write!(f, "<{}>", of)?;
        }
        if let Some(target) = &self.reference {
            write!(f, " -> {}", target)?;
        }
        if self.required {
            write!(f, " required")?;
        }
        if self.unique {
            write!(f, " unique")?;
        }
        if let Some(default) = &self.default {
            write!(f, " default {}", default)?;
        }
        Ok(())
    }
}

/// A declared default: either a JSON literal or an expression token such as
/// `Date.now` that can only be evaluated at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Expression {
        #[serde(rename = "$expr")]
        expr: String,
    },
    Literal(Value),
}

impl DefaultValue {
    pub fn expression(expr: impl Into<String>) -> Self {
        DefaultValue::Expression { expr: expr.into() }
    }

    /// True for the clock expressions (`Date.now`, `Date.now()`, `now`).
    pub fn is_clock(&self) -> bool {
        matches!(self, DefaultValue::Expression { expr } if is_clock_expr(expr))
    }
}

pub(crate) fn is_clock_expr(expr: &str) -> bool {
    matches!(
        expr.trim(),
        "Date.now" | "Date.now()" | "now" | "new Date()" | "Date"
    )
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Expression { expr } => write!(f, "{}", expr),
            DefaultValue::Literal(v) => write!(f, "{}", v),
        }
    }
}

/// Sort order of one index key: `1`/`-1`, or a special kind like `"text"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexOrder {
    Direction(i64),
    Kind(String),
}

impl fmt::Display for IndexOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexOrder::Direction(d) => write!(f, "{}", d),
            IndexOrder::Kind(k) => write!(f, "{}", k),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    #[serde(default)]
    pub unique: bool,
}

/// A declared index.
///
/// Equality compares the set of `(field, order)` pairs and the options,
/// ignoring the order in which keys were declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub fields: IndexMap<String, IndexOrder>,
    #[serde(default)]
    pub options: IndexOptions,
}

impl IndexDescriptor {
    pub fn new(fields: IndexMap<String, IndexOrder>) -> Self {
        Self {
            fields,
            options: IndexOptions::default(),
        }
    }

    pub fn ascending<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            fields
                .into_iter()
                .map(|f| (f.into(), IndexOrder::Direction(1)))
                .collect(),
        )
    }

    pub fn key(mut self, field: impl Into<String>, order: IndexOrder) -> Self {
        self.fields.insert(field.into(), order);
        self
    }

    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }

    /// Field signature sorted by field name.
    pub fn signature(&self) -> Vec<(&str, &IndexOrder)> {
        let mut keys: Vec<_> = self.fields.iter().map(|(k, v)| (k.as_str(), v)).collect();
        keys.sort();
        keys
    }

    /// Canonical text form of the signature, e.g. `name:1,price:-1`.
    pub fn signature_key(&self) -> String {
        self.signature()
            .iter()
            .map(|(field, order)| format!("{}:{}", field, order))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Conventional index name in declaration order, e.g. `name_1_price_-1`.
    pub fn name(&self) -> String {
        self.fields
            .iter()
            .map(|(field, order)| format!("{}_{}", field, order))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl PartialEq for IndexDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.options == other.options && self.signature() == other.signature()
    }
}

impl Eq for IndexDescriptor {}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .fields
            .iter()
            .map(|(field, order)| format!("{}: {}", field, order))
            .collect();
        write!(f, "{{ {} }}", keys.join(", "))?;
        if self.options.unique {
            write!(f, " unique")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_name_pluralization() {
        assert_eq!(SchemaDescriptor::new("Widget").collection_name(), "widgets");
        assert_eq!(SchemaDescriptor::new("Category").collection_name(), "categories");
        assert_eq!(SchemaDescriptor::new("Box").collection_name(), "boxes");
        assert_eq!(SchemaDescriptor::new("Day").collection_name(), "days");
        assert_eq!(SchemaDescriptor::new("Status").collection_name(), "statuses");
    }

    #[test]
    fn test_collection_option_overrides_name() {
        let schema = SchemaDescriptor::new("Widget").option("collection", "inventory");
        assert_eq!(schema.collection_name(), "inventory");
    }

    #[test]
    fn test_index_equality_ignores_declaration_order() {
        let a = IndexDescriptor::ascending(["a"]).key("b", IndexOrder::Direction(-1));
        let b = IndexDescriptor::new(IndexMap::new())
            .key("b", IndexOrder::Direction(-1))
            .key("a", IndexOrder::Direction(1));
        assert_eq!(a, b);
        assert_eq!(a.signature_key(), "a:1,b:-1");
        assert_eq!(a.name(), "a_1_b_-1");
        assert_ne!(b.name(), a.name());
    }

    #[test]
    fn test_index_equality_respects_direction_and_uniqueness() {
        let asc = IndexDescriptor::ascending(["a"]);
        let desc = IndexDescriptor::new(IndexMap::new()).key("a", IndexOrder::Direction(-1));
        assert_ne!(asc, desc);
        assert_ne!(asc.clone(), asc.unique());
    }

    #[test]
    fn test_field_shape_is_serialized_form() {
        let a = FieldDescriptor::new("string").required();
        let b = FieldDescriptor::new("string").required();
        let c = FieldDescriptor::new("string");
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }

    #[test]
    fn test_default_value_serialization() {
        let literal = FieldDescriptor::new("number").default_value(DefaultValue::Literal(json!(5)));
        let expr = FieldDescriptor::new("date").default_value(DefaultValue::expression("Date.now"));

        assert_eq!(
            serde_json::to_value(&literal).unwrap(),
            json!({"type": "number", "required": false, "unique": false, "default": 5})
        );
        let value = serde_json::to_value(&expr).unwrap();
        assert_eq!(value["default"], json!({"$expr": "Date.now"}));

        let back: FieldDescriptor = serde_json::from_value(value).unwrap();
        assert!(back.default.unwrap().is_clock());
    }

    #[test]
    fn test_snapshot_serializes_as_entity_map() {
        let snapshot: Snapshot = vec![
            SchemaDescriptor::new("Widget").field("name", FieldDescriptor::new("string")),
            SchemaDescriptor::new("Account"),
        ]
        .into_iter()
        .collect();

        let text = serde_json::to_string(&snapshot).unwrap();
        assert!(text.starts_with(r#"{"Account":"#));
        let back: Snapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snapshot);
    }
}
