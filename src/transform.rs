use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::adapter::ObjectFilter;
use crate::domain::KEY_FIELD;
use crate::error::KiraError;
use crate::object_store::{ObjectStore, Selector, Upsert};
use crate::worker::{ChunkOutcome, WorkerPool};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    pub collection: String,
    pub processed: usize,
    pub changed: usize,
    pub written: usize,
    pub failed: Vec<String>,
    pub dry_run: bool,
    pub ok: bool,
}

pub fn transform_collection(
    store: &dyn ObjectStore,
    collection: &str,
    filter: &dyn ObjectFilter,
    pool: &WorkerPool,
    dry_run: bool,
) -> Result<TransformReport, KiraError> {
    let documents: Vec<(String, Value)> = store
        .query(collection, &Selector::new(), &[])?
        .into_iter()
        .collect();
    info!(collection, documents = documents.len(), dry_run, "transforming collection");

    let outcome = pool.run(&documents, |chunk| {
        let mut outcome = ChunkOutcome::default();
        for (key, document) in chunk {
            let result = filter.filter(document.clone());
            if !result.ok {
                outcome.failed.push(key.clone());
                continue;
            }
            let upsert = diff_fragment(document, &result.document).map(|update| {
                let mut selector = Selector::new();
                selector.insert(KEY_FIELD.to_string(), Value::String(key.clone()));
                Upsert { selector, update }
            });
            outcome.succeeded.push(upsert);
        }
        outcome
    })?;

    let processed = outcome.succeeded.len() + outcome.failed.len();
    let upserts: Vec<Upsert> = outcome.succeeded.into_iter().flatten().collect();
    let changed = upserts.len();
    let mut failed = outcome.failed;
    failed.sort();

    let (written, ok) = if dry_run || upserts.is_empty() {
        (0, true)
    } else {
        match store.upsert_batch(collection, upserts) {
            Ok(count) => (count, true),
            Err(err) => {
                error!(collection, error = %err, "write-back failed");
                (0, false)
            }
        }
    };
    info!(processed, changed, written, failed = failed.len(), "transform finished");

    Ok(TransformReport {
        collection: collection.to_string(),
        processed,
        changed,
        written,
        failed,
        dry_run,
        ok,
    })
}

pub fn diff_fragment(original: &Value, updated: &Value) -> Option<Map<String, Value>> {
    let (Value::Object(before), Value::Object(after)) = (original, updated) else {
        return None;
    };
    let mut fragment = Map::new();
    for (name, value) in after {
        if before.get(name) != Some(value) {
            fragment.insert(name.clone(), value.clone());
        }
    }
    for name in before.keys() {
        if !after.contains_key(name) {
            fragment.insert(name.clone(), Value::Null);
        }
    }
    if fragment.is_empty() { None } else { Some(fragment) }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn diff_marks_removed_fields() {
        let before = json!({"a": 1, "b": 2, "c": 3});
        let after = json!({"a": 1, "b": 5});
        let fragment = diff_fragment(&before, &after).unwrap();
        assert_eq!(Value::Object(fragment), json!({"b": 5, "c": null}));
        assert!(diff_fragment(&before, &before).is_none());
    }
}
