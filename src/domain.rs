use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KiraError;

pub const CONTAINER_FIELD: &str = "rcsb_polymer_entity_container_identifiers";
pub const REFERENCE_FIELD: &str = "reference_sequence_identifiers";
pub const ALIGN_FIELD: &str = "rcsb_polymer_entity_align";
pub const ANNOTATION_FIELD: &str = "rcsb_polymer_entity_annotation";
pub const SOURCE_ORGANISM_FIELD: &str = "rcsb_entity_source_organism";
pub const KEY_FIELD: &str = "rcsb_id";

static UNIPROT_ACCESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9]([A-Z][A-Z0-9]{2}[0-9]){1,2})(-\d+)?$")
        .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniprotId(String);

impl UniprotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn base(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for UniprotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UniprotId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !UNIPROT_ACCESSION.is_match(&normalized) {
            return Err(KiraError::InvalidUniprotId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entry_id: String,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(entry_id: &str, entity_id: &str) -> Result<Self, KiraError> {
        format!("{entry_id}_{entity_id}").parse()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.entry_id, self.entity_id)
    }
}

impl FromStr for EntityKey {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (entry, entity) = trimmed
            .split_once('_')
            .ok_or_else(|| KiraError::InvalidEntityKey(value.to_string()))?;
        let entry = entry.to_uppercase();
        let entry_ok = entry.len() == 4 && entry.chars().all(|ch| ch.is_ascii_alphanumeric());
        let entity_ok = !entity.is_empty() && entity.chars().all(|ch| ch.is_ascii_digit());
        if !entry_ok || !entity_ok {
            return Err(KiraError::InvalidEntityKey(value.to_string()));
        }
        Ok(Self {
            entry_id: entry,
            entity_id: entity.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Primary,
    Secondary,
    None,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKind::Primary => write!(f, "primary"),
            MatchKind::Secondary => write!(f, "secondary"),
            MatchKind::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInfo {
    #[serde(rename = "taxId")]
    pub tax_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub matched: MatchKind,
    #[serde(rename = "matchedIds", default)]
    pub matched_ids: BTreeMap<String, CandidateInfo>,
}

impl MatchRecord {
    pub fn primary(accession: &str, tax_id: Option<u64>) -> Self {
        let mut matched_ids = BTreeMap::new();
        matched_ids.insert(accession.to_string(), CandidateInfo { tax_id });
        Self {
            matched: MatchKind::Primary,
            matched_ids,
        }
    }

    pub fn secondary<I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = (String, Option<u64>)>,
    {
        Self {
            matched: MatchKind::Secondary,
            matched_ids: candidates
                .into_iter()
                .map(|(accession, tax_id)| (accession, CandidateInfo { tax_id }))
                .collect(),
        }
    }

    pub fn unmatched() -> Self {
        Self {
            matched: MatchKind::None,
            matched_ids: BTreeMap::new(),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched != MatchKind::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceAssignment {
    pub database_name: String,
    pub database_accession: String,
    pub provenance_source: String,
}

impl ReferenceAssignment {
    pub fn new(database_name: &str, database_accession: &str, provenance_source: &str) -> Self {
        Self {
            database_name: database_name.to_string(),
            database_accession: database_accession.to_string(),
            provenance_source: provenance_source.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlignedRange {
    pub entity_beg_seq_id: u64,
    pub ref_beg_seq_id: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlignmentRegion {
    pub reference_database_name: String,
    pub reference_database_accession: String,
    pub provenance_source: String,
    #[serde(default)]
    pub aligned_regions: Vec<AlignedRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReference {
    pub database: String,
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub accession: String,
    #[serde(default)]
    pub secondary_accessions: Vec<String>,
    pub entry_name: Option<String>,
    pub protein_name: Option<String>,
    #[serde(default)]
    pub gene_names: Vec<String>,
    pub organism: Option<String>,
    pub tax_id: Option<u64>,
    pub sequence: Option<String>,
    pub sequence_length: Option<u64>,
    #[serde(default)]
    pub ec_numbers: Vec<String>,
    #[serde(default)]
    pub cross_references: Vec<CrossReference>,
}

impl ReferenceRecord {
    pub fn cross_references_for<'a>(
        &'a self,
        database: &'a str,
    ) -> impl Iterator<Item = &'a CrossReference> + 'a {
        self.cross_references
            .iter()
            .filter(move |xref| xref.database == database)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntity {
    pub key: EntityKey,
    pub chain_ids: Vec<String>,
    pub assignments: Vec<ReferenceAssignment>,
    pub alignments: Vec<AlignmentRegion>,
    pub taxonomy_ids: BTreeSet<u64>,
}

impl LocalEntity {
    pub fn from_document(document: &Value) -> Result<Self, KiraError> {
        let key = document_key(document)?;
        let malformed = |err: KiraError| match err {
            KiraError::MalformedDocument { message, .. } => KiraError::MalformedDocument {
                key: key.to_string(),
                message,
            },
            other => other,
        };

        let chain_ids: Vec<String> = lookup(document, &[CONTAINER_FIELD, "auth_asym_ids"])
            .map_err(malformed)?
            .unwrap_or_default();
        let assignments: Vec<ReferenceAssignment> =
            lookup(document, &[CONTAINER_FIELD, REFERENCE_FIELD])
                .map_err(malformed)?
                .unwrap_or_default();
        let alignments: Vec<AlignmentRegion> = lookup(document, &[ALIGN_FIELD])
            .map_err(malformed)?
            .unwrap_or_default();

        let mut taxonomy_ids = BTreeSet::new();
        let organisms: Vec<Value> = lookup(document, &[SOURCE_ORGANISM_FIELD])
            .map_err(malformed)?
            .unwrap_or_default();
        for organism in &organisms {
            let tax_id: Option<u64> =
                lookup(organism, &["ncbi_taxonomy_id"]).map_err(malformed)?;
            if let Some(tax_id) = tax_id {
                taxonomy_ids.insert(tax_id);
            }
        }

        Ok(Self {
            key,
            chain_ids,
            assignments,
            alignments,
            taxonomy_ids,
        })
    }
}

pub fn document_key(document: &Value) -> Result<EntityKey, KiraError> {
    let label = document
        .get(KEY_FIELD)
        .and_then(|v| v.as_str())
        .unwrap_or("<unknown>")
        .to_string();
    if let Some(id) = document.get(KEY_FIELD).and_then(|v| v.as_str()) {
        return id.parse();
    }
    let entry: Option<String> = lookup(document, &[CONTAINER_FIELD, "entry_id"])?;
    let entity: Option<String> = lookup(document, &[CONTAINER_FIELD, "entity_id"])?;
    match (entry, entity) {
        (Some(entry), Some(entity)) => EntityKey::new(&entry, &entity),
        _ => Err(KiraError::MalformedDocument {
            key: label,
            message: "no entity identifier".to_string(),
        }),
    }
}

/// Nested field access: `Ok(None)` when any segment is absent or null,
/// `Err` when the value exists but has the wrong shape.
pub fn lookup<T: DeserializeOwned>(value: &Value, path: &[&str]) -> Result<Option<T>, KiraError> {
    let mut current = value;
    for segment in path {
        match current.get(segment) {
            Some(Value::Null) | None => return Ok(None),
            Some(next) => current = next,
        }
    }
    serde_json::from_value(current.clone())
        .map(Some)
        .map_err(|err| KiraError::MalformedDocument {
            key: value
                .get(KEY_FIELD)
                .and_then(|v| v.as_str())
                .unwrap_or("<unknown>")
                .to_string(),
            message: format!("{}: {err}", path.join(".")),
        })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_entity_key_valid() {
        let key: EntityKey = "1abc_2".parse().unwrap();
        assert_eq!(key.entry_id, "1ABC");
        assert_eq!(key.entity_id, "2");
        assert_eq!(key.to_string(), "1ABC_2");
    }

    #[test]
    fn parse_entity_key_invalid() {
        let err = "1ABC".parse::<EntityKey>().unwrap_err();
        assert_matches!(err, KiraError::InvalidEntityKey(_));
    }

    #[test]
    fn lookup_distinguishes_absent_from_malformed() {
        let doc = json!({"rcsb_id": "1ABC_1", "a": {"b": "text"}});
        let absent: Option<Vec<String>> = lookup(&doc, &["a", "c"]).unwrap();
        assert!(absent.is_none());
        let err = lookup::<Vec<String>>(&doc, &["a", "b"]).unwrap_err();
        assert_matches!(err, KiraError::MalformedDocument { .. });
    }
}
