use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use chrono::{Duration, Utc};

use kira_reference_sync::domain::{MatchKind, MatchRecord};
use kira_reference_sync::error::KiraError;
use kira_reference_sync::match_cache::{MatchCache, MatchSummary};
use kira_reference_sync::uniprot::{FetchBatch, ReferenceFetcher};
use kira_reference_sync::worker::WorkerPool;

#[derive(Default)]
struct MockFetcher {
    known: BTreeMap<String, MatchRecord>,
    failing: BTreeSet<String>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn with_primary(accessions: &[&str]) -> Self {
        let mut fetcher = Self::default();
        for accession in accessions {
            fetcher
                .known
                .insert(accession.to_string(), MatchRecord::primary(accession, Some(9606)));
        }
        fetcher
    }

    fn requested(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

impl ReferenceFetcher for MockFetcher {
    fn fetch_batch(&self, accessions: &[String]) -> Result<FetchBatch, KiraError> {
        self.calls.lock().unwrap().extend(accessions.iter().cloned());
        if accessions.iter().any(|id| self.failing.contains(id)) {
            return Err(KiraError::UniprotStatus {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        let matches = accessions
            .iter()
            .filter_map(|id| self.known.get(id).map(|record| (id.clone(), record.clone())))
            .collect();
        Ok(FetchBatch {
            records: BTreeMap::new(),
            matches,
        })
    }
}

fn universe(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

#[test]
fn reload_fetches_only_missing_and_expired() {
    let now = Utc::now();
    let mut cache = MatchCache::new();
    cache.insert_match_at("P00001", MatchRecord::primary("P00001", None), now);
    cache.insert_match_at(
        "P00002",
        MatchRecord::primary("P00002", None),
        now - Duration::days(30),
    );
    cache.insert_match_at("P00009", MatchRecord::primary("P00009", None), now);

    let fetcher = MockFetcher::with_primary(&["P00002", "P00003"]);
    let pool = WorkerPool::new(2, 1);
    let outcome = cache
        .reload(
            &fetcher,
            &pool,
            &universe(&["P00001", "P00002", "P00003", "P00004"]),
            14,
        )
        .unwrap();

    assert_eq!(fetcher.requested(), vec!["P00002", "P00003", "P00004"]);
    assert_eq!(outcome.requested, 4);
    assert_eq!(outcome.fetched, 3);
    assert_eq!(outcome.missing, 1);
    assert_eq!(
        cache.match_record("P00004").map(|record| record.matched),
        Some(MatchKind::None)
    );
    assert!(cache.match_record("P00009").is_some());
    let refreshed = cache.cached_match("P00002").unwrap();
    assert!(refreshed.rcsb_last_update > now - Duration::days(1));
}

#[test]
fn reload_with_zero_expiry_fetches_missing_only() {
    let mut cache = MatchCache::new();
    cache.insert_match_at(
        "P00001",
        MatchRecord::primary("P00001", None),
        Utc::now() - Duration::days(365),
    );
    let fetcher = MockFetcher::with_primary(&["P00002"]);
    let outcome = cache
        .reload(&fetcher, &WorkerPool::new(1, 50), &universe(&["P00001", "P00002"]), 0)
        .unwrap();
    assert_eq!(fetcher.requested(), vec!["P00002"]);
    assert_eq!(outcome.fetched, 1);
    assert_eq!(outcome.missing, 0);
}

#[test]
fn reload_does_not_cache_errored_accessions() {
    let mut cache = MatchCache::new();
    let mut fetcher = MockFetcher::with_primary(&["P00001"]);
    fetcher.failing.insert("P00002".to_string());
    let outcome = cache
        .reload(&fetcher, &WorkerPool::new(2, 1), &universe(&["P00001", "P00002"]), 14)
        .unwrap();
    assert!(cache.match_record("P00001").is_some());
    assert!(cache.match_record("P00002").is_none());
    assert_eq!(outcome.missing, 1);
}

#[test]
fn refresh_purges_failures_below_fraction() {
    let old = Utc::now() - Duration::days(30);
    let mut cache = MatchCache::new();
    for id in ["P00001", "P00002", "P00003", "P00004"] {
        cache.insert_match_at(id, MatchRecord::primary(id, None), old);
    }
    cache.insert_match("P00005", MatchRecord::primary("P00005", None));

    // One of four expired accessions disappears upstream.
    let fetcher = MockFetcher::with_primary(&["P00001", "P00002", "P00003"]);
    let outcome = cache
        .refresh(&fetcher, &WorkerPool::new(2, 2), 14, 0.75)
        .unwrap();

    assert_eq!(fetcher.requested(), vec!["P00001", "P00002", "P00003", "P00004"]);
    assert_eq!(outcome.expired, 4);
    assert_eq!(outcome.failed, vec!["P00004"]);
    assert_eq!(outcome.purged, vec!["P00004"]);
    assert!(cache.match_record("P00004").is_none());
    assert_eq!(cache.len(), 4);
    assert!(cache.expired_ids(14, Utc::now()).is_empty());
}

#[test]
fn refresh_skips_purge_at_failure_fraction() {
    let old = Utc::now() - Duration::days(30);
    let mut cache = MatchCache::new();
    for id in ["P00001", "P00002", "P00003", "P00004"] {
        cache.insert_match_at(id, MatchRecord::primary(id, None), old);
    }
    // Three of four fail: 0.75 is not below the threshold.
    let fetcher = MockFetcher::with_primary(&["P00001"]);
    let outcome = cache
        .refresh(&fetcher, &WorkerPool::new(1, 10), 14, 0.75)
        .unwrap();
    assert_eq!(outcome.failed.len(), 3);
    assert!(outcome.purged.is_empty());
    assert_eq!(cache.len(), 4);
}

#[test]
fn refresh_counts_errored_batches_as_failures() {
    let old = Utc::now() - Duration::days(30);
    let mut cache = MatchCache::new();
    for id in ["P00001", "P00002", "P00003", "P00004", "P00005"] {
        cache.insert_match_at(id, MatchRecord::primary(id, None), old);
    }
    let mut fetcher = MockFetcher::with_primary(&["P00001", "P00002", "P00003", "P00004", "P00005"]);
    fetcher.failing.insert("P00005".to_string());
    let outcome = cache
        .refresh(&fetcher, &WorkerPool::new(2, 1), 14, 0.5)
        .unwrap();
    assert_eq!(outcome.failed, vec!["P00005"]);
    assert_eq!(outcome.purged, vec!["P00005"]);
    assert_eq!(cache.len(), 4);
}

#[test]
fn refresh_without_expired_entries_is_a_no_op() {
    let mut cache = MatchCache::new();
    cache.insert_match("P00001", MatchRecord::primary("P00001", None));
    let fetcher = MockFetcher::default();
    let outcome = cache
        .refresh(&fetcher, &WorkerPool::new(2, 10), 14, 0.75)
        .unwrap();
    assert_eq!(outcome.expired, 0);
    assert!(fetcher.requested().is_empty());

    let outcome = cache
        .refresh(&fetcher, &WorkerPool::new(2, 10), 0, 0.75)
        .unwrap();
    assert_eq!(outcome.expired, 0);
}

#[test]
fn acceptance_gate() {
    // 1000 records, 50 primary.
    let mut cache = MatchCache::new();
    for index in 0..1000 {
        let id = format!("A{index:05}");
        let record = if index < 50 {
            MatchRecord::primary(&id, None)
        } else {
            MatchRecord::unmatched()
        };
        cache.insert_match(&id, record);
    }
    assert_eq!(
        cache.summary(),
        MatchSummary {
            primary: 50,
            secondary: 0,
            none: 950
        }
    );
    assert!(!cache.test_cache(1, 50.0));
    assert!(cache.test_cache(1, 5.0));
    assert!(!cache.test_cache(1001, 5.0));
    let err = cache.acceptance(1, 50.0).unwrap_err();
    assert!(matches!(
        err,
        KiraError::CacheAcceptance { count: 1000, .. }
    ));
}

#[test]
fn empty_cache_fails_acceptance() {
    let cache = MatchCache::new();
    assert!(!cache.test_cache(1, 0.0));
    assert_eq!(cache.summary().primary_percent(), 0.0);
}

#[test]
fn refresh_purges_unmatched_from_both_stores() {
    let old = Utc::now() - Duration::days(20);
    let mut cache = MatchCache::new();
    let ids: Vec<String> = (0..100).map(|index| format!("P{index:05}")).collect();
    for id in &ids {
        cache.insert_match_at(id, MatchRecord::primary(id, None), old);
        cache.insert_reference(kira_reference_sync::domain::ReferenceRecord {
            accession: id.clone(),
            secondary_accessions: Vec::new(),
            entry_name: None,
            protein_name: None,
            gene_names: Vec::new(),
            organism: None,
            tax_id: None,
            sequence: None,
            sequence_length: None,
            ec_numbers: Vec::new(),
            cross_references: Vec::new(),
        });
    }
    let resolving: Vec<&str> = ids[..80].iter().map(|id| id.as_str()).collect();
    let fetcher = MockFetcher::with_primary(&resolving);

    let outcome = cache
        .refresh(&fetcher, &WorkerPool::new(4, 7), 14, 0.75)
        .unwrap();
    assert_eq!(outcome.expired, 100);
    assert_eq!(outcome.purged.len(), 20);
    assert_eq!(outcome.purged, ids[80..].to_vec());
    assert_eq!(cache.len(), 80);
    assert_eq!(cache.references().len(), 80);
    for id in &ids[80..] {
        assert!(cache.match_record(id).is_none());
        assert!(cache.reference_record(id).is_none());
    }
}
