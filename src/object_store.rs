use std::collections::BTreeMap;
use std::fs;
use std::sync::RwLock;

use camino::Utf8Path;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::KiraError;
use crate::store::Store;

pub type Selector = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    pub selector: Selector,
    /// Top-level fields to set; a `null` value removes the field.
    pub update: Map<String, Value>,
}

pub trait ObjectStore: Send + Sync {
    fn query(
        &self,
        collection: &str,
        filter: &Selector,
        fields: &[&str],
    ) -> Result<BTreeMap<String, Value>, KiraError>;

    fn upsert_batch(&self, collection: &str, updates: Vec<Upsert>) -> Result<usize, KiraError>;

    fn count(&self, collection: &str) -> Result<usize, KiraError>;

    fn exists(&self, collection: &str) -> bool;
}

pub struct MemoryStore {
    key_field: String,
    collections: RwLock<BTreeMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new(key_field: &str) -> Self {
        Self {
            key_field: key_field.to_string(),
            collections: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert_many(&self, collection: &str, documents: Vec<Value>) {
        let mut guard = self
            .collections
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        guard
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    pub fn documents(&self, collection: &str) -> Vec<Value> {
        let guard = self
            .collections
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        guard.get(collection).cloned().unwrap_or_default()
    }

    pub fn load_dir(key_field: &str, root: &Utf8Path) -> Result<Self, KiraError> {
        let store = Self::new(key_field);
        if !root.as_std_path().exists() {
            return Ok(store);
        }
        let entries =
            fs::read_dir(root.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for entry in entries {
            let path = entry
                .map_err(|err| KiraError::Filesystem(err.to_string()))?
                .path();
            if !path.is_file() || path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let content =
                fs::read_to_string(&path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let documents: Vec<Value> = serde_json::from_str(&content).map_err(|err| {
                KiraError::Filesystem(format!("{}: {err}", path.display()))
            })?;
            debug!(collection = name, count = documents.len(), "loaded collection");
            store.insert_many(name, documents);
        }
        Ok(store)
    }

    pub fn save_dir(&self, root: &Utf8Path) -> Result<(), KiraError> {
        let guard = self
            .collections
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        for (name, documents) in guard.iter() {
            let content = serde_json::to_vec_pretty(documents)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            Store::write_bytes_atomic(&root.join(format!("{name}.json")), &content)?;
        }
        Ok(())
    }

    fn key_of(&self, document: &Value) -> Option<String> {
        match document.get(&self.key_field) {
            Some(Value::String(key)) => Some(key.clone()),
            Some(Value::Number(key)) => Some(key.to_string()),
            _ => None,
        }
    }
}

impl ObjectStore for MemoryStore {
    fn query(
        &self,
        collection: &str,
        filter: &Selector,
        fields: &[&str],
    ) -> Result<BTreeMap<String, Value>, KiraError> {
        let guard = self
            .collections
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        let documents = guard
            .get(collection)
            .ok_or_else(|| KiraError::CollectionNotFound(collection.to_string()))?;

        let mut result = BTreeMap::new();
        for document in documents {
            if !matches_selector(document, filter) {
                continue;
            }
            let Some(key) = self.key_of(document) else {
                warn!(collection, "document without {} skipped", self.key_field);
                continue;
            };
            result.insert(key, project(document, fields, &self.key_field));
        }
        Ok(result)
    }

    fn upsert_batch(&self, collection: &str, updates: Vec<Upsert>) -> Result<usize, KiraError> {
        let mut guard = self
            .collections
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        let documents = guard.entry(collection.to_string()).or_default();

        let mut count = 0usize;
        for upsert in updates {
            let position = documents
                .iter()
                .position(|document| matches_selector(document, &upsert.selector));
            let target = match position {
                Some(index) => &mut documents[index],
                None => {
                    let mut created = Value::Object(Map::new());
                    for (path, value) in &upsert.selector {
                        set_path(&mut created, path, value.clone());
                    }
                    documents.push(created);
                    let last = documents.len() - 1;
                    &mut documents[last]
                }
            };
            if let Value::Object(fields) = target {
                for (name, value) in upsert.update {
                    if value.is_null() {
                        fields.remove(&name);
                    } else {
                        fields.insert(name, value);
                    }
                }
            }
            count += 1;
        }
        Ok(count)
    }

    fn count(&self, collection: &str) -> Result<usize, KiraError> {
        let guard = self
            .collections
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        guard
            .get(collection)
            .map(|documents| documents.len())
            .ok_or_else(|| KiraError::CollectionNotFound(collection.to_string()))
    }

    fn exists(&self, collection: &str) -> bool {
        let guard = self
            .collections
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        guard.contains_key(collection)
    }
}

fn get_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

fn set_path(document: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = document;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(fields) => fields
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(fields) = current {
        fields.insert(last.to_string(), value);
    }
}

fn matches_selector(document: &Value, selector: &Selector) -> bool {
    selector.iter().all(|(path, expected)| match get_path(document, path) {
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(actual) => actual == expected,
        None => false,
    })
}

fn project(document: &Value, fields: &[&str], key_field: &str) -> Value {
    if fields.is_empty() {
        return document.clone();
    }
    let mut projected = Value::Object(Map::new());
    if let Some(key) = document.get(key_field) {
        set_path(&mut projected, key_field, key.clone());
    }
    for field in fields {
        if let Some(value) = get_path(document, field) {
            set_path(&mut projected, field, value.clone());
        }
    }
    projected
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn query_projects_dotted_fields() {
        let store = MemoryStore::new("rcsb_id");
        store.insert_many(
            "entity",
            vec![json!({"rcsb_id": "1ABC_1", "a": {"b": 1, "c": 2}, "d": 3})],
        );
        let result = store
            .query("entity", &Selector::new(), &["a.b"])
            .unwrap();
        assert_eq!(result["1ABC_1"], json!({"rcsb_id": "1ABC_1", "a": {"b": 1}}));
    }

    #[test]
    fn upsert_creates_missing_documents() {
        let store = MemoryStore::new("rcsb_id");
        let mut selector = Selector::new();
        selector.insert("rcsb_id".to_string(), json!("2XYZ_1"));
        let mut update = Map::new();
        update.insert("x".to_string(), json!(true));
        let count = store
            .upsert_batch("entity", vec![Upsert { selector, update }])
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.count("entity").unwrap(), 1);
        assert_eq!(store.documents("entity")[0]["x"], json!(true));
    }
}
