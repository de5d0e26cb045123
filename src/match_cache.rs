use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{MatchKind, MatchRecord, ReferenceRecord};
use crate::error::KiraError;
use crate::store::{CacheFormat, Snapshot, Store};
use crate::uniprot::{FetchBatch, ReferenceFetcher};
use crate::worker::{ChunkOutcome, WorkerPool};

pub const MATCH_SNAPSHOT: &str = "uniprot-match";
pub const REFERENCE_SNAPSHOT: &str = "uniprot-data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMatch {
    pub record: MatchRecord,
    pub rcsb_last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub primary: usize,
    pub secondary: usize,
    pub none: usize,
}

impl MatchSummary {
    pub fn total(&self) -> usize {
        self.primary + self.secondary + self.none
    }

    pub fn primary_percent(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        100.0 * self.primary as f64 / self.total() as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
    pub errored: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    pub requested: usize,
    pub fetched: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub expired: usize,
    pub failed: Vec<String>,
    pub purged: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchCache {
    matches: BTreeMap<String, CachedMatch>,
    references: BTreeMap<String, ReferenceRecord>,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn match_record(&self, accession: &str) -> Option<&MatchRecord> {
        self.matches.get(accession).map(|cached| &cached.record)
    }

    pub fn cached_match(&self, accession: &str) -> Option<&CachedMatch> {
        self.matches.get(accession)
    }

    pub fn reference_record(&self, accession: &str) -> Option<&ReferenceRecord> {
        self.references.get(accession)
    }

    pub fn matches(&self) -> impl Iterator<Item = (&String, &MatchRecord)> {
        self.matches
            .iter()
            .map(|(accession, cached)| (accession, &cached.record))
    }

    pub fn references(&self) -> &BTreeMap<String, ReferenceRecord> {
        &self.references
    }

    pub fn insert_match(&mut self, accession: &str, record: MatchRecord) {
        self.insert_match_at(accession, record, Utc::now());
    }

    pub fn insert_match_at(&mut self, accession: &str, record: MatchRecord, at: DateTime<Utc>) {
        self.matches.insert(
            accession.to_string(),
            CachedMatch {
                record,
                rcsb_last_update: at,
            },
        );
    }

    pub fn insert_reference(&mut self, record: ReferenceRecord) {
        self.references.insert(record.accession.clone(), record);
    }

    /// Cached accessions whose last update precedes `now - expire_days`.
    /// Nothing expires when `expire_days` is zero.
    pub fn expired_ids(&self, expire_days: u32, now: DateTime<Utc>) -> Vec<String> {
        if expire_days == 0 {
            return Vec::new();
        }
        let cutoff = now - Duration::days(i64::from(expire_days));
        self.matches
            .iter()
            .filter(|(_, cached)| cached.rcsb_last_update < cutoff)
            .map(|(accession, _)| accession.clone())
            .collect()
    }

    pub fn reference_data_ids(
        &self,
        universe: &BTreeSet<String>,
        expire_days: u32,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let expired: BTreeSet<String> = self.expired_ids(expire_days, now).into_iter().collect();
        universe
            .iter()
            .filter(|accession| !self.matches.contains_key(*accession) || expired.contains(*accession))
            .cloned()
            .collect()
    }

    pub fn reload(
        &mut self,
        fetcher: &dyn ReferenceFetcher,
        pool: &WorkerPool,
        universe: &BTreeSet<String>,
        expire_days: u32,
    ) -> Result<ReloadOutcome, KiraError> {
        let delta = self.reference_data_ids(universe, expire_days, Utc::now());
        info!(
            universe = universe.len(),
            cached = self.matches.len(),
            delta = delta.len(),
            "reloading match cache"
        );
        let report = self.fetch_ids(fetcher, pool, &delta, true)?;
        if !report.errored.is_empty() {
            warn!(count = report.errored.len(), "accessions failed to fetch");
        }

        let missing = universe
            .iter()
            .filter(|accession| {
                self.match_record(accession)
                    .map(|record| !record.is_matched())
                    .unwrap_or(true)
            })
            .count();
        Ok(ReloadOutcome {
            requested: universe.len(),
            fetched: delta.len(),
            missing,
        })
    }

    pub fn refresh(
        &mut self,
        fetcher: &dyn ReferenceFetcher,
        pool: &WorkerPool,
        expire_days: u32,
        failure_fraction: f64,
    ) -> Result<RefreshOutcome, KiraError> {
        let expired = self.expired_ids(expire_days, Utc::now());
        if expired.is_empty() {
            info!("no expired match records");
            return Ok(RefreshOutcome::default());
        }

        let report = self.fetch_ids(fetcher, pool, &expired, false)?;
        let mut failed: Vec<String> = report
            .unmatched
            .into_iter()
            .chain(report.errored)
            .collect();
        failed.sort();

        let fraction = failed.len() as f64 / expired.len() as f64;
        let purged = if fraction < failure_fraction {
            self.purge(&failed);
            failed.clone()
        } else {
            warn!(
                failed = failed.len(),
                expired = expired.len(),
                failure_fraction,
                "failure rate too high, skipping purge"
            );
            Vec::new()
        };
        info!(
            expired = expired.len(),
            failed = failed.len(),
            purged = purged.len(),
            "match cache refreshed"
        );
        Ok(RefreshOutcome {
            expired: expired.len(),
            failed,
            purged,
        })
    }

    pub fn fetch_ids(
        &mut self,
        fetcher: &dyn ReferenceFetcher,
        pool: &WorkerPool,
        ids: &[String],
        cache_negative: bool,
    ) -> Result<FetchReport, KiraError> {
        let outcome = pool.run(ids, |chunk| match fetcher.fetch_batch(chunk) {
            Ok(batch) => ChunkOutcome {
                succeeded: vec![(chunk.to_vec(), batch)],
                failed: Vec::new(),
                diagnostics: Vec::new(),
            },
            Err(err) => {
                warn!(error = %err, size = chunk.len(), "reference fetch failed");
                ChunkOutcome {
                    succeeded: Vec::new(),
                    failed: chunk.to_vec(),
                    diagnostics: vec![err.to_string()],
                }
            }
        })?;

        let now = Utc::now();
        let mut report = FetchReport {
            errored: outcome.failed,
            ..FetchReport::default()
        };
        for (requested, batch) in outcome.succeeded {
            let FetchBatch {
                records,
                mut matches,
            } = batch;
            self.references.extend(records);
            for accession in requested {
                match matches.remove(&accession) {
                    Some(record) if record.is_matched() => {
                        self.insert_match_at(&accession, record, now);
                        report.matched.push(accession);
                    }
                    _ => {
                        if cache_negative {
                            self.insert_match_at(&accession, MatchRecord::unmatched(), now);
                        }
                        report.unmatched.push(accession);
                    }
                }
            }
        }
        report.matched.sort();
        report.unmatched.sort();
        report.errored.sort();
        Ok(report)
    }

    pub fn purge(&mut self, accessions: &[String]) {
        for accession in accessions {
            self.matches.remove(accession);
            self.references.remove(accession);
        }
    }

    pub fn summary(&self) -> MatchSummary {
        let mut summary = MatchSummary::default();
        for cached in self.matches.values() {
            match cached.record.matched {
                MatchKind::Primary => summary.primary += 1,
                MatchKind::Secondary => summary.secondary += 1,
                MatchKind::None => summary.none += 1,
            }
        }
        summary
    }

    pub fn test_cache(&self, min_count: usize, min_match_primary_percent: f64) -> bool {
        self.acceptance(min_count, min_match_primary_percent).is_ok()
    }

    pub fn acceptance(
        &self,
        min_count: usize,
        min_match_primary_percent: f64,
    ) -> Result<MatchSummary, KiraError> {
        let summary = self.summary();
        let primary_percent = summary.primary_percent();
        info!(
            primary = summary.primary,
            secondary = summary.secondary,
            none = summary.none,
            primary_percent,
            "match cache summary"
        );
        if summary.total() < min_count || primary_percent < min_match_primary_percent {
            return Err(KiraError::CacheAcceptance {
                count: summary.total(),
                primary_percent,
                min_count,
                min_percent: min_match_primary_percent,
            });
        }
        Ok(summary)
    }

    pub fn save(&self, store: &Store, format: CacheFormat) -> Result<(), KiraError> {
        store.ensure_cache_root()?;
        store.write_snapshot(MATCH_SNAPSHOT, format, &Snapshot::new(self.matches.clone()))?;
        store.write_snapshot(
            REFERENCE_SNAPSHOT,
            format,
            &Snapshot::new(self.references.clone()),
        )?;
        Ok(())
    }

    pub fn load(store: &Store, format: CacheFormat) -> Self {
        let matches = store.read_snapshot::<CachedMatch>(MATCH_SNAPSHOT, format);
        let references = store.read_snapshot::<ReferenceRecord>(REFERENCE_SNAPSHOT, format);
        match (matches, references) {
            (Ok(matches), Ok(references)) => Self {
                matches: matches.map(|s| s.mapping).unwrap_or_default(),
                references: references.map(|s| s.mapping).unwrap_or_default(),
            },
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "discarding unreadable match cache");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_ids_respects_zero_expiry() {
        let mut cache = MatchCache::new();
        let old = Utc::now() - Duration::days(100);
        cache.insert_match_at("P12345", MatchRecord::primary("P12345", None), old);
        assert!(cache.expired_ids(0, Utc::now()).is_empty());
        assert_eq!(cache.expired_ids(14, Utc::now()), vec!["P12345".to_string()]);
    }

    #[test]
    fn summary_counts_by_kind() {
        let mut cache = MatchCache::new();
        cache.insert_match("P12345", MatchRecord::primary("P12345", Some(9606)));
        cache.insert_match(
            "P00001",
            MatchRecord::secondary(vec![("P99999".to_string(), Some(9606))]),
        );
        cache.insert_match("Q00000", MatchRecord::unmatched());
        let summary = cache.summary();
        assert_eq!(summary, MatchSummary { primary: 1, secondary: 1, none: 1 });
        assert!(cache.test_cache(3, 30.0));
        assert!(!cache.test_cache(3, 50.0));
    }
}
