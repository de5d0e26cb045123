use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::ResolvedConfig;
use crate::domain::{
    AlignmentRegion, EntityKey, LocalEntity, MatchKind, MatchRecord, ReferenceAssignment,
    UniprotId,
};
use crate::match_cache::{MatchCache, MatchSummary};
use crate::sifts::{FallbackAlignmentSource, SIFTS_PROVENANCE};

pub const KNOWN_REFERENCE_DATABASES: &[&str] = &[
    "UniProt", "GenBank", "EMBL", "NDB", "NORINE", "PIR", "PRF", "RefSeq",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub reference_database_name: String,
    pub provenance_sources: BTreeSet<String>,
    pub excluded_databases: BTreeSet<String>,
    pub known_reference_databases: BTreeSet<String>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            reference_database_name: "UniProt".to_string(),
            provenance_sources: BTreeSet::from(["PDB".to_string()]),
            excluded_databases: BTreeSet::from(["PDB".to_string()]),
            known_reference_databases: KNOWN_REFERENCE_DATABASES
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl ReconcileSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            reference_database_name: config.reference_database_name.clone(),
            provenance_sources: config.provenance_sources.iter().cloned().collect(),
            excluded_databases: config.excluded_databases.iter().cloned().collect(),
            ..Self::default()
        }
    }

    fn is_target(&self, database_name: &str, provenance_source: &str) -> bool {
        database_name == self.reference_database_name
            && self.provenance_sources.contains(provenance_source)
            && !self.excluded_databases.contains(database_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemapOutcome<T> {
    Resolved(T),
    AlternateSource(T),
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Matched,
    Fallback,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReconciliation {
    pub key: EntityKey,
    pub status: EntityStatus,
    /// `None` means the field should be removed from the document.
    pub assignments: Option<Vec<ReferenceAssignment>>,
    pub alignments: Option<Vec<AlignmentRegion>>,
    pub remapped: BTreeMap<String, String>,
}

pub fn select_candidate(record: &MatchRecord, taxonomy_hints: &BTreeSet<u64>) -> Option<String> {
    let mut candidates = record.matched_ids.iter();
    if record.matched_ids.len() == 1 {
        return candidates.next().map(|(accession, _)| accession.clone());
    }
    if taxonomy_hints.len() != 1 {
        return None;
    }
    let hint = taxonomy_hints.iter().next().copied();
    let mut consistent = record
        .matched_ids
        .iter()
        .filter(|(_, info)| info.tax_id.is_some() && info.tax_id == hint);
    match (consistent.next(), consistent.next()) {
        (Some((accession, _)), None) => Some(accession.clone()),
        _ => None,
    }
}

pub fn alignment_hash(alignment: &AlignmentRegion) -> String {
    let mut hasher = Sha256::new();
    hasher.update(alignment.reference_database_accession.as_bytes());
    for range in &alignment.aligned_regions {
        hasher.update(b"|");
        hasher.update(
            format!(
                "{}:{}:{}",
                range.entity_beg_seq_id, range.ref_beg_seq_id, range.length
            )
            .as_bytes(),
        );
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    cache: Arc<MatchCache>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(cache: Arc<MatchCache>, settings: ReconcileSettings) -> Self {
        Self { cache, settings }
    }

    pub fn cache(&self) -> &MatchCache {
        &self.cache
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    pub fn remap_accession(
        &self,
        assignment: &ReferenceAssignment,
        taxonomy_hints: &BTreeSet<u64>,
    ) -> RemapOutcome<ReferenceAssignment> {
        if self
            .settings
            .excluded_databases
            .contains(&assignment.database_name)
        {
            return RemapOutcome::Unresolved;
        }
        if self
            .settings
            .is_target(&assignment.database_name, &assignment.provenance_source)
        {
            return match self.resolve_accession(&assignment.database_accession, taxonomy_hints) {
                Some(accession) => RemapOutcome::Resolved(ReferenceAssignment {
                    database_accession: accession,
                    ..assignment.clone()
                }),
                None => RemapOutcome::Unresolved,
            };
        }
        if self.is_alternate(&assignment.database_name, &assignment.provenance_source) {
            return RemapOutcome::AlternateSource(assignment.clone());
        }
        RemapOutcome::Unresolved
    }

    pub fn remap_alignment(
        &self,
        alignment: &AlignmentRegion,
        taxonomy_hints: &BTreeSet<u64>,
    ) -> RemapOutcome<AlignmentRegion> {
        if self
            .settings
            .excluded_databases
            .contains(&alignment.reference_database_name)
        {
            return RemapOutcome::Unresolved;
        }
        if self.settings.is_target(
            &alignment.reference_database_name,
            &alignment.provenance_source,
        ) {
            return match self
                .resolve_accession(&alignment.reference_database_accession, taxonomy_hints)
            {
                Some(accession) => RemapOutcome::Resolved(AlignmentRegion {
                    reference_database_accession: accession,
                    ..alignment.clone()
                }),
                None => RemapOutcome::Unresolved,
            };
        }
        if self.is_alternate(&alignment.reference_database_name, &alignment.provenance_source) {
            return RemapOutcome::AlternateSource(alignment.clone());
        }
        RemapOutcome::Unresolved
    }

    pub fn reconcile_entity(
        &self,
        entity: &LocalEntity,
        fallback: Option<&dyn FallbackAlignmentSource>,
    ) -> EntityReconciliation {
        let hints = &entity.taxonomy_ids;
        let mut assignments = Vec::new();
        let mut remapped = BTreeMap::new();
        let mut dropped = BTreeSet::new();
        let mut matched = false;

        for assignment in &entity.assignments {
            match self.remap_accession(assignment, hints) {
                RemapOutcome::Resolved(updated) => {
                    matched = true;
                    if updated.database_accession != assignment.database_accession {
                        remapped.insert(
                            assignment.database_accession.clone(),
                            updated.database_accession.clone(),
                        );
                    }
                    push_unique(&mut assignments, updated);
                }
                RemapOutcome::AlternateSource(updated) => push_unique(&mut assignments, updated),
                RemapOutcome::Unresolved => {
                    if self
                        .settings
                        .is_target(&assignment.database_name, &assignment.provenance_source)
                    {
                        dropped.insert(assignment.database_accession.clone());
                    } else {
                        push_unique(&mut assignments, assignment.clone());
                    }
                }
            }
        }

        if matched {
            let mut alignments = Vec::new();
            for alignment in &entity.alignments {
                if let Some(updated) = self.follow_alignment(alignment, hints, &remapped, &dropped) {
                    alignments.push(updated);
                }
            }
            if !remapped.is_empty() {
                info!(entity = %entity.key, ?remapped, "rewrote secondary accessions");
            }
            return EntityReconciliation {
                key: entity.key.clone(),
                status: EntityStatus::Matched,
                assignments: Some(assignments),
                alignments: non_empty(dedupe_alignments(alignments)),
                remapped,
            };
        }

        let provenance = &self.settings.provenance_sources;
        let mut assignments: Vec<ReferenceAssignment> = Vec::new();
        for assignment in &entity.assignments {
            if !provenance.contains(&assignment.provenance_source) {
                push_unique(&mut assignments, assignment.clone());
            }
        }
        let mut alignments: Vec<AlignmentRegion> = entity
            .alignments
            .iter()
            .filter(|alignment| !provenance.contains(&alignment.provenance_source))
            .cloned()
            .collect();

        let found = fallback
            .map(|source| source.longest_alignments(&entity.key.entry_id, &entity.chain_ids))
            .unwrap_or_default();
        let status = if found.is_empty() {
            debug!(entity = %entity.key, "no fallback alignment available");
            EntityStatus::Degraded
        } else {
            for chain in found {
                push_unique(
                    &mut assignments,
                    ReferenceAssignment::new(
                        &self.settings.reference_database_name,
                        &chain.accession,
                        SIFTS_PROVENANCE,
                    ),
                );
                alignments.push(AlignmentRegion {
                    reference_database_name: self.settings.reference_database_name.clone(),
                    reference_database_accession: chain.accession,
                    provenance_source: SIFTS_PROVENANCE.to_string(),
                    aligned_regions: chain.regions,
                });
            }
            info!(entity = %entity.key, "using SIFTS fallback mapping");
            EntityStatus::Fallback
        };

        EntityReconciliation {
            key: entity.key.clone(),
            status,
            assignments: non_empty(assignments),
            alignments: non_empty(dedupe_alignments(alignments)),
            remapped,
        }
    }

    pub fn accession_align_summary(&self) -> MatchSummary {
        self.cache.summary()
    }

    fn resolve_accession(&self, accession: &str, taxonomy_hints: &BTreeSet<u64>) -> Option<String> {
        let key = accession
            .parse::<UniprotId>()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|_| accession.to_string());
        let Some(record) = self.cache.match_record(&key) else {
            debug!(accession, "no match data for accession");
            return None;
        };
        match record.matched {
            MatchKind::Primary => Some(accession.to_string()),
            MatchKind::Secondary => {
                let selected = select_candidate(record, taxonomy_hints);
                if selected.is_none() {
                    info!(
                        accession,
                        candidates = record.matched_ids.len(),
                        ?taxonomy_hints,
                        "ambiguous secondary accession"
                    );
                }
                selected
            }
            MatchKind::None => None,
        }
    }

    fn is_alternate(&self, database_name: &str, provenance_source: &str) -> bool {
        self.settings.known_reference_databases.contains(database_name)
            && self.settings.provenance_sources.contains(provenance_source)
    }

    fn follow_alignment(
        &self,
        alignment: &AlignmentRegion,
        hints: &BTreeSet<u64>,
        remapped: &BTreeMap<String, String>,
        dropped: &BTreeSet<String>,
    ) -> Option<AlignmentRegion> {
        if !self.settings.is_target(
            &alignment.reference_database_name,
            &alignment.provenance_source,
        ) {
            return Some(alignment.clone());
        }
        let accession = &alignment.reference_database_accession;
        if let Some(new_accession) = remapped.get(accession) {
            return Some(AlignmentRegion {
                reference_database_accession: new_accession.clone(),
                ..alignment.clone()
            });
        }
        if dropped.contains(accession) {
            return None;
        }
        match self.remap_alignment(alignment, hints) {
            RemapOutcome::Resolved(updated) | RemapOutcome::AlternateSource(updated) => {
                Some(updated)
            }
            RemapOutcome::Unresolved => None,
        }
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

fn dedupe_alignments(alignments: Vec<AlignmentRegion>) -> Vec<AlignmentRegion> {
    let mut seen = BTreeSet::new();
    alignments
        .into_iter()
        .filter(|alignment| seen.insert(alignment_hash(alignment)))
        .collect()
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_candidate_ignores_taxonomy() {
        let record = MatchRecord::secondary(vec![("P99999".to_string(), Some(9606))]);
        let hints = BTreeSet::from([10090]);
        assert_eq!(select_candidate(&record, &hints).as_deref(), Some("P99999"));
    }

    #[test]
    fn hash_ignores_provenance() {
        let a = AlignmentRegion {
            reference_database_name: "UniProt".to_string(),
            reference_database_accession: "P12345".to_string(),
            provenance_source: "PDB".to_string(),
            aligned_regions: Vec::new(),
        };
        let b = AlignmentRegion {
            provenance_source: "SIFTS".to_string(),
            ..a.clone()
        };
        assert_eq!(alignment_hash(&a), alignment_hash(&b));
    }
}
