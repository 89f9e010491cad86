//! Collection state shared by the memory and JSON file backends.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{StoreError, StoreResult};
use crate::schema::{IndexDescriptor, IndexOrder};

/// A stored document.
pub type Document = Map<String, Value>;

/// Primary key of a document as a string: string ids verbatim, other ids in
/// their JSON form.
pub fn document_id(document: &Document) -> Option<String> {
    match document.get("_id")? {
        Value::Null => None,
        Value::String(id) => Some(id.clone()),
        other => Some(other.to_string()),
    }
}

/// Serialize a value that maps to a JSON object into a document.
pub fn to_document<T: Serialize>(value: &T) -> serde_json::Result<Document> {
    serde_json::from_value(serde_json::to_value(value)?)
}

/// An index as created in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: IndexMap<String, IndexOrder>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(keys: IndexMap<String, IndexOrder>, unique: bool) -> Self {
        let descriptor = IndexDescriptor::new(keys);
        Self {
            name: descriptor.name(),
            keys: descriptor.fields,
            unique,
        }
    }

    fn same_keys(&self, other: &IndexSpec) -> bool {
        self.unique == other.unique && self.keys.iter().eq(other.keys.iter())
    }

    /// Key tuple of a document under this index; missing fields count as null.
    fn key_of(&self, document: &Document) -> String {
        let values: Vec<&Value> = self
            .keys
            .keys()
            .map(|field| document.get(field).unwrap_or(&Value::Null))
            .collect();
        serde_json::to_string(&values).unwrap_or_default()
    }
}

impl From<&IndexDescriptor> for IndexSpec {
    fn from(descriptor: &IndexDescriptor) -> Self {
        IndexSpec::new(descriptor.fields.clone(), descriptor.options.unique)
    }
}

/// Documents keyed by id, plus index definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Collection {
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(default)]
    pub documents: IndexMap<String, Document>,
}

impl Collection {
    pub fn find_one(&self, id: &str) -> Option<Document> {
        self.documents.get(id).cloned()
    }

    pub fn find_all(&self) -> Vec<Document> {
        self.documents.values().cloned().collect()
    }

    fn check_unique(&self, name: &str, id: &str, document: &Document) -> StoreResult<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = index.key_of(document);
            let taken = self
                .documents
                .iter()
                .any(|(other_id, other)| other_id != id && index.key_of(other) == key);
            if taken {
                return Err(StoreError::DuplicateKey {
                    collection: name.to_string(),
                    index: index.name.clone(),
                    key,
                });
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, name: &str, document: Document) -> StoreResult<()> {
        let id = document_id(&document).ok_or_else(|| StoreError::MissingId {
            collection: name.to_string(),
        })?;
        if self.documents.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: name.to_string(),
                index: "_id_".to_string(),
                key: id,
            });
        }
        self.check_unique(name, &id, &document)?;
        self.documents.insert(id, document);
        Ok(())
    }

    pub fn upsert(&mut self, name: &str, id: &str, mut document: Document) -> StoreResult<()> {
        if !document.contains_key("_id") {
            document.insert("_id".to_string(), Value::String(id.to_string()));
        }
        self.check_unique(name, id, &document)?;
        self.documents.insert(id.to_string(), document);
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> bool {
        self.documents.shift_remove(id).is_some()
    }

    pub fn compare_and_swap(
        &mut self,
        name: &str,
        id: &str,
        expected: Option<&Document>,
        replacement: Document,
    ) -> StoreResult<bool> {
        if self.documents.get(id) != expected {
            return Ok(false);
        }
        self.upsert(name, id, replacement)?;
        Ok(true)
    }

    pub fn set_where_missing(&mut self, field: &str, value: &Value) -> u64 {
        let mut changed = 0;
        for document in self.documents.values_mut() {
            if !document.contains_key(field) {
                document.insert(field.to_string(), value.clone());
                changed += 1;
            }
        }
        changed
    }

    pub fn unset_field(&mut self, field: &str) -> u64 {
        let mut changed = 0;
        for document in self.documents.values_mut() {
            if document.shift_remove(field).is_some() {
                changed += 1;
            }
        }
        changed
    }

    pub fn rename_field(&mut self, from: &str, to: &str) -> u64 {
        let mut changed = 0;
        for document in self.documents.values_mut() {
            if let Some(value) = document.shift_remove(from) {
                document.insert(to.to_string(), value);
                changed += 1;
            }
        }
        changed
    }

    pub fn create_index(&mut self, name: &str, index: &IndexSpec) -> StoreResult<()> {
        if let Some(existing) = self.indexes.iter().find(|i| i.name == index.name) {
            if existing.same_keys(index) {
                return Ok(());
            }
            return Err(StoreError::IndexConflict {
                collection: name.to_string(),
                index: index.name.clone(),
            });
        }

        if index.unique {
            let mut seen = std::collections::HashSet::new();
            for document in self.documents.values() {
                let key = index.key_of(document);
                if !seen.insert(key.clone()) {
                    return Err(StoreError::DuplicateKey {
                        collection: name.to_string(),
                        index: index.name.clone(),
                        key,
                    });
                }
            }
        }

        self.indexes.push(index.clone());
        Ok(())
    }

    pub fn drop_index(&mut self, index: &str) -> bool {
        let before = self.indexes.len();
        self.indexes.retain(|i| i.name != index);
        self.indexes.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn unique_name() -> IndexSpec {
        IndexSpec::new(
            IndexMap::from([("name".to_string(), IndexOrder::Direction(1))]),
            true,
        )
    }

    #[test]
    fn test_document_id_forms() {
        assert_eq!(document_id(&doc(json!({"_id": "001"}))), Some("001".to_string()));
        assert_eq!(document_id(&doc(json!({"_id": 7}))), Some("7".to_string()));
        assert_eq!(document_id(&doc(json!({"_id": null}))), None);
        assert_eq!(document_id(&doc(json!({}))), None);
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut c = Collection::default();
        c.insert("w", doc(json!({"_id": "a"}))).unwrap();
        let err = c.insert("w", doc(json!({"_id": "a"}))).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert!(matches!(
            c.insert("w", doc(json!({"x": 1}))),
            Err(StoreError::MissingId { .. })
        ));
    }

    #[test]
    fn test_unique_index_enforced() {
        let mut c = Collection::default();
        c.create_index("w", &unique_name()).unwrap();
        c.insert("w", doc(json!({"_id": "a", "name": "x"}))).unwrap();
        assert!(c.insert("w", doc(json!({"_id": "b", "name": "x"}))).is_err());
        // replacing the holder of the key is fine
        c.upsert("w", "a", doc(json!({"name": "x", "v": 2}))).unwrap();
        assert_eq!(c.find_one("a").unwrap()["_id"], json!("a"));
    }

    #[test]
    fn test_unique_index_on_duplicates_fails() {
        let mut c = Collection::default();
        c.insert("w", doc(json!({"_id": "a", "name": "x"}))).unwrap();
        c.insert("w", doc(json!({"_id": "b", "name": "x"}))).unwrap();
        let err = c.create_index("w", &unique_name()).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { ref index, .. } if index == "name_1"));
        assert!(c.indexes.is_empty());
    }

    #[test]
    fn test_create_index_is_idempotent() {
        let mut c = Collection::default();
        c.create_index("w", &unique_name()).unwrap();
        c.create_index("w", &unique_name()).unwrap();
        assert_eq!(c.indexes.len(), 1);

        let plain = IndexSpec::new(unique_name().keys, false);
        assert!(matches!(
            c.create_index("w", &plain),
            Err(StoreError::IndexConflict { .. })
        ));
        assert!(c.drop_index("name_1"));
        assert!(!c.drop_index("name_1"));
    }

    #[test]
    fn test_field_operations() {
        let mut c = Collection::default();
        c.insert("w", doc(json!({"_id": "a", "price": 5}))).unwrap();
        c.insert("w", doc(json!({"_id": "b"}))).unwrap();

        assert_eq!(c.set_where_missing("price", &json!(0)), 1);
        assert_eq!(c.find_one("a").unwrap()["price"], json!(5));
        assert_eq!(c.find_one("b").unwrap()["price"], json!(0));

        assert_eq!(c.rename_field("price", "cost"), 2);
        assert_eq!(c.unset_field("cost"), 2);
        assert_eq!(c.unset_field("cost"), 0);
    }

    #[test]
    fn test_compare_and_swap() {
        let mut c = Collection::default();
        let first = doc(json!({"_id": "lock", "heldBy": "a"}));
        assert!(c.compare_and_swap("l", "lock", None, first.clone()).unwrap());
        assert!(!c.compare_and_swap("l", "lock", None, first.clone()).unwrap());

        let second = doc(json!({"_id": "lock", "heldBy": "b"}));
        assert!(c.compare_and_swap("l", "lock", Some(&first), second.clone()).unwrap());
        assert!(!c.compare_and_swap("l", "lock", Some(&first), second).unwrap());
    }
}
