use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::{
    ALIGN_FIELD, ANNOTATION_FIELD, CONTAINER_FIELD, KEY_FIELD, LocalEntity, REFERENCE_FIELD,
    ReferenceRecord, UniprotId, lookup,
};
use crate::error::KiraError;
use crate::ontology::{AnnotationResources, LineageItem};
use crate::reconcile::{EntityReconciliation, Reconciler};
use crate::sifts::FallbackAlignmentSource;

pub const ANNOTATION_PROVENANCE: &str = "UniProt";

#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    pub ok: bool,
    pub document: Value,
}

pub trait ObjectFilter: Send + Sync {
    fn filter(&self, document: Value) -> FilterResult;
}

#[derive(Clone)]
pub struct ReferenceSequenceAdapter {
    reconciler: Reconciler,
    fallback: Option<Arc<dyn FallbackAlignmentSource>>,
}

impl ReferenceSequenceAdapter {
    pub fn new(reconciler: Reconciler, fallback: Option<Arc<dyn FallbackAlignmentSource>>) -> Self {
        Self {
            reconciler,
            fallback,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn reconcile_document(
        &self,
        document: &Value,
    ) -> Result<(EntityReconciliation, Value), KiraError> {
        let entity = LocalEntity::from_document(document)?;
        let reconciliation = self
            .reconciler
            .reconcile_entity(&entity, self.fallback.as_deref());
        let updated = apply_reconciliation(document.clone(), &reconciliation)?;
        Ok((reconciliation, updated))
    }
}

impl ObjectFilter for ReferenceSequenceAdapter {
    fn filter(&self, document: Value) -> FilterResult {
        match self.reconcile_document(&document) {
            Ok((_, updated)) => FilterResult {
                ok: true,
                document: updated,
            },
            Err(err) => {
                warn!(key = %document_label(&document), error = %err, "skipping entity");
                FilterResult {
                    ok: false,
                    document,
                }
            }
        }
    }
}

pub fn apply_reconciliation(
    mut document: Value,
    reconciliation: &EntityReconciliation,
) -> Result<Value, KiraError> {
    let key = reconciliation.key.to_string();
    let Value::Object(fields) = &mut document else {
        return Err(KiraError::MalformedDocument {
            key,
            message: "document is not an object".to_string(),
        });
    };

    match &reconciliation.assignments {
        Some(assignments) => {
            let container = fields
                .entry(CONTAINER_FIELD.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            let Value::Object(container) = container else {
                return Err(KiraError::MalformedDocument {
                    key,
                    message: format!("{CONTAINER_FIELD} is not an object"),
                });
            };
            container.insert(REFERENCE_FIELD.to_string(), to_value(&key, assignments)?);
        }
        None => {
            if let Some(Value::Object(container)) = fields.get_mut(CONTAINER_FIELD) {
                container.remove(REFERENCE_FIELD);
            }
        }
    }

    match &reconciliation.alignments {
        Some(alignments) => {
            fields.insert(ALIGN_FIELD.to_string(), to_value(&key, alignments)?);
        }
        None => {
            fields.remove(ALIGN_FIELD);
        }
    }
    Ok(document)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolymerAnnotation {
    #[serde(rename = "type")]
    pub kind: String,
    pub annotation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub provenance_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_lineage: Option<Vec<LineageItem>>,
}

#[derive(Clone)]
pub struct ReferenceAnnotationAdapter {
    sequence: ReferenceSequenceAdapter,
    resources: Arc<AnnotationResources>,
}

impl ReferenceAnnotationAdapter {
    pub fn new(sequence: ReferenceSequenceAdapter, resources: Arc<AnnotationResources>) -> Self {
        Self {
            sequence,
            resources,
        }
    }

    fn annotate(&self, document: &Value) -> Result<Value, KiraError> {
        let (reconciliation, mut updated) = self.sequence.reconcile_document(document)?;
        let key = reconciliation.key.to_string();
        let reconciler = self.sequence.reconciler();
        let target = &reconciler.settings().reference_database_name;

        let mut accessions = Vec::new();
        for assignment in reconciliation.assignments.iter().flatten() {
            if &assignment.database_name == target
                && !accessions.contains(&assignment.database_accession)
            {
                accessions.push(assignment.database_accession.clone());
            }
        }

        let mut generated = Vec::new();
        for accession in &accessions {
            let record = reconciler.cache().reference_record(accession).or_else(|| {
                accession
                    .parse::<UniprotId>()
                    .ok()
                    .and_then(|id| reconciler.cache().reference_record(id.base()))
            });
            match record {
                Some(record) => generated.extend(self.record_annotations(record)),
                None => debug!(
                    entity = %key,
                    accession = %accession,
                    "no reference data for accession"
                ),
            }
        }

        let existing: Vec<Value> = lookup(document, &[ANNOTATION_FIELD])?.unwrap_or_default();
        if existing.is_empty() && generated.is_empty() {
            return Ok(updated);
        }

        let mut candidates = existing;
        for annotation in &generated {
            candidates.push(to_value(&key, annotation)?);
        }
        let mut seen = BTreeSet::new();
        let mut merged = Vec::new();
        for annotation in candidates {
            let kind = annotation.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let id = annotation
                .get("annotation_id")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if seen.insert((kind.to_string(), id.to_string())) {
                merged.push(annotation);
            } else {
                debug!(entity = %key, kind, id, "dropping duplicate annotation");
            }
        }

        if let Value::Object(fields) = &mut updated {
            fields.insert(ANNOTATION_FIELD.to_string(), Value::Array(merged));
        }
        Ok(updated)
    }

    fn record_annotations(&self, record: &ReferenceRecord) -> Vec<PolymerAnnotation> {
        let mut annotations = Vec::new();
        let go = self.resources.go.as_ref();
        for xref in record.cross_references_for("GO") {
            if go.map(|go| go.is_obsolete(&xref.id)).unwrap_or(false) {
                continue;
            }
            let name = go
                .and_then(|go| go.name(&xref.id))
                .map(|name| name.to_string())
                .or_else(|| {
                    xref.properties.get("GoTerm").map(|term| {
                        term.split_once(':')
                            .map(|(_, name)| name.to_string())
                            .unwrap_or_else(|| term.clone())
                    })
                });
            let lineage = go.map(|go| go.lineage(&xref.id)).unwrap_or_default();
            annotations.push(PolymerAnnotation {
                kind: "GO".to_string(),
                annotation_id: xref.id.clone(),
                name,
                provenance_source: ANNOTATION_PROVENANCE.to_string(),
                assignment_version: go.and_then(|go| go.version()).map(|v| v.to_string()),
                annotation_lineage: non_empty(lineage),
            });
        }
        for database in ["Pfam", "InterPro"] {
            for xref in record.cross_references_for(database) {
                annotations.push(PolymerAnnotation {
                    kind: database.to_string(),
                    annotation_id: xref.id.clone(),
                    name: xref.properties.get("EntryName").cloned(),
                    provenance_source: ANNOTATION_PROVENANCE.to_string(),
                    assignment_version: None,
                    annotation_lineage: None,
                });
            }
        }
        let enzyme = self.resources.enzyme.as_ref();
        for ec_number in &record.ec_numbers {
            let lineage = enzyme
                .map(|tree| tree.lineage(ec_number))
                .unwrap_or_default();
            annotations.push(PolymerAnnotation {
                kind: "EC".to_string(),
                annotation_id: ec_number.clone(),
                name: enzyme
                    .and_then(|tree| tree.name(ec_number))
                    .map(|name| name.to_string()),
                provenance_source: ANNOTATION_PROVENANCE.to_string(),
                assignment_version: None,
                annotation_lineage: non_empty(lineage),
            });
        }
        annotations
    }
}

impl ObjectFilter for ReferenceAnnotationAdapter {
    fn filter(&self, document: Value) -> FilterResult {
        match self.annotate(&document) {
            Ok(updated) => FilterResult {
                ok: true,
                document: updated,
            },
            Err(err) => {
                warn!(key = %document_label(&document), error = %err, "skipping entity");
                FilterResult {
                    ok: false,
                    document,
                }
            }
        }
    }
}

fn to_value<T: Serialize>(key: &str, value: &T) -> Result<Value, KiraError> {
    serde_json::to_value(value).map_err(|err| KiraError::MalformedDocument {
        key: key.to_string(),
        message: err.to_string(),
    })
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

fn document_label(document: &Value) -> &str {
    document
        .get(KEY_FIELD)
        .and_then(|v| v.as_str())
        .unwrap_or("<unknown>")
}
