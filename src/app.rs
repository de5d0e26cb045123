use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use crate::adapter::{ObjectFilter, ReferenceAnnotationAdapter, ReferenceSequenceAdapter};
use crate::config::ResolvedConfig;
use crate::domain::{CONTAINER_FIELD, LocalEntity, REFERENCE_FIELD, UniprotId};
use crate::error::KiraError;
use crate::match_cache::{MatchCache, MatchSummary, RefreshOutcome, ReloadOutcome};
use crate::object_store::{ObjectStore, Selector};
use crate::ontology::{AnnotationResources, KnowledgeClient};
use crate::reconcile::{ReconcileSettings, Reconciler};
use crate::sifts::FallbackAlignmentSource;
use crate::store::Store;
use crate::transform::{TransformReport, transform_collection};
use crate::uniprot::ReferenceFetcher;
use crate::worker::WorkerPool;

pub const GO_FILE: &str = "go-basic.obo";
pub const ENZYME_FILE: &str = "enzclass.txt";

#[derive(Debug, Clone, Serialize)]
pub struct CacheUpdateResult {
    pub reload: ReloadOutcome,
    pub refresh: RefreshOutcome,
    pub summary: MatchSummary,
    pub references: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheRefreshResult {
    pub refresh: RefreshOutcome,
    pub summary: MatchSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheTestResult {
    pub passed: bool,
    pub summary: MatchSummary,
    pub primary_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OntologyFetchResult {
    pub go_path: String,
    pub go_version: Option<String>,
    pub enzyme_path: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<F: ReferenceFetcher> {
    store: Store,
    config: ResolvedConfig,
    fetcher: F,
    objects: Arc<dyn ObjectStore>,
    fallback: Option<Arc<dyn FallbackAlignmentSource>>,
}

impl<F: ReferenceFetcher> App<F> {
    pub fn new(
        store: Store,
        config: ResolvedConfig,
        fetcher: F,
        objects: Arc<dyn ObjectStore>,
        fallback: Option<Arc<dyn FallbackAlignmentSource>>,
    ) -> Self {
        Self {
            store,
            config,
            fetcher,
            objects,
            fallback,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.config.num_proc, self.config.max_chunk_size)
    }

    pub fn load_cache(&self) -> MatchCache {
        MatchCache::load(&self.store, self.config.cache_format)
    }

    pub fn accession_universe(&self) -> Result<BTreeSet<String>, KiraError> {
        let settings = ReconcileSettings::from_config(&self.config);
        let reference_path = format!("{CONTAINER_FIELD}.{REFERENCE_FIELD}");
        let chains_path = format!("{CONTAINER_FIELD}.auth_asym_ids");
        let documents = self.objects.query(
            &self.config.collection,
            &Selector::new(),
            &[reference_path.as_str(), chains_path.as_str()],
        )?;

        let mut universe = BTreeSet::new();
        for (key, document) in &documents {
            let entity = match LocalEntity::from_document(document) {
                Ok(entity) => entity,
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping entity");
                    continue;
                }
            };
            for assignment in &entity.assignments {
                if assignment.database_name != settings.reference_database_name
                    || settings
                        .excluded_databases
                        .contains(&assignment.database_name)
                {
                    continue;
                }
                match assignment.database_accession.parse::<UniprotId>() {
                    Ok(id) => {
                        universe.insert(id.as_str().to_string());
                    }
                    Err(_) => warn!(
                        entity = %entity.key,
                        accession = %assignment.database_accession,
                        "ignoring malformed accession"
                    ),
                }
            }
            if let Some(fallback) = &self.fallback {
                for chain in fallback.longest_alignments(&entity.key.entry_id, &entity.chain_ids) {
                    universe.insert(chain.accession);
                }
            }
        }
        Ok(universe)
    }

    pub fn update_cache(
        &self,
        expire_days: Option<u32>,
        sink: &dyn ProgressSink,
    ) -> Result<CacheUpdateResult, KiraError> {
        let started = Instant::now();
        let expire_days = expire_days.unwrap_or(self.config.expire_days);
        let pool = self.pool();
        let mut cache = self.load_cache();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} cached accessions", cache.len()),
            elapsed: None,
        });

        let universe = self.accession_universe()?;
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {} accessions in use", universe.len()),
            elapsed: Some(started.elapsed()),
        });
        let reload = cache.reload(&self.fetcher, &pool, &universe, expire_days)?;
        let refresh = cache.refresh(
            &self.fetcher,
            &pool,
            expire_days,
            self.config.failure_fraction,
        )?;

        cache.save(&self.store, self.config.cache_format)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; fetched {}, missing {}, purged {}",
                reload.fetched,
                reload.missing,
                refresh.purged.len()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(CacheUpdateResult {
            reload,
            refresh,
            summary: cache.summary(),
            references: cache.references().len(),
        })
    }

    pub fn refresh_cache(
        &self,
        expire_days: Option<u32>,
        failure_fraction: Option<f64>,
        sink: &dyn ProgressSink,
    ) -> Result<CacheRefreshResult, KiraError> {
        let started = Instant::now();
        let mut cache = self.load_cache();
        let refresh = cache.refresh(
            &self.fetcher,
            &self.pool(),
            expire_days.unwrap_or(self.config.expire_days),
            failure_fraction.unwrap_or(self.config.failure_fraction),
        )?;
        cache.save(&self.store, self.config.cache_format)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; {} expired, {} purged",
                refresh.expired,
                refresh.purged.len()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(CacheRefreshResult {
            refresh,
            summary: cache.summary(),
        })
    }

    pub fn test_cache(
        &self,
        min_match_primary_percent: Option<f64>,
    ) -> Result<CacheTestResult, KiraError> {
        let cache = self.load_cache();
        let summary = cache.acceptance(
            self.config.min_count,
            min_match_primary_percent.unwrap_or(self.config.min_match_primary_percent),
        )?;
        Ok(CacheTestResult {
            passed: true,
            primary_percent: summary.primary_percent(),
            summary,
        })
    }

    pub fn summary(&self) -> MatchSummary {
        let reconciler = Reconciler::new(
            Arc::new(self.load_cache()),
            ReconcileSettings::from_config(&self.config),
        );
        reconciler.accession_align_summary()
    }

    pub fn reconcile(
        &self,
        annotate: bool,
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> Result<TransformReport, KiraError> {
        let started = Instant::now();
        let reconciler = Reconciler::new(
            Arc::new(self.load_cache()),
            ReconcileSettings::from_config(&self.config),
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; {} match records loaded",
                reconciler.cache().len()
            ),
            elapsed: None,
        });

        let sequence = ReferenceSequenceAdapter::new(reconciler, self.fallback.clone());
        let filter: Box<dyn ObjectFilter> = if annotate {
            let resources = Arc::new(self.annotation_resources()?);
            Box::new(ReferenceAnnotationAdapter::new(sequence, resources))
        } else {
            Box::new(sequence)
        };

        let report = transform_collection(
            self.objects.as_ref(),
            &self.config.collection,
            filter.as_ref(),
            &self.pool(),
            dry_run,
        )?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; {} changed, {} failed",
                report.changed,
                report.failed.len()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }

    pub fn annotation_resources(&self) -> Result<AnnotationResources, KiraError> {
        let go_path = self
            .config
            .go_path
            .clone()
            .or_else(|| self.cached_file(GO_FILE));
        let enzyme_path = self
            .config
            .enzyme_path
            .clone()
            .or_else(|| self.cached_file(ENZYME_FILE));
        AnnotationResources::load(go_path.as_deref(), enzyme_path.as_deref())
    }

    pub fn fetch_ontology<K: KnowledgeClient>(
        &self,
        client: &K,
        sink: &dyn ProgressSink,
    ) -> Result<OntologyFetchResult, KiraError> {
        self.store.ensure_cache_root()?;
        let go_path = self.store.ontology_path(GO_FILE);
        let enzyme_path = self.store.ontology_path(ENZYME_FILE);

        sink.event(ProgressEvent {
            message: "phase=Fetch; gene ontology".to_string(),
            elapsed: None,
        });
        let go = client.download_go(go_path.as_std_path())?;
        let (go_version, _) = crate::ontology::parse_go_header(&go);

        sink.event(ProgressEvent {
            message: "phase=Fetch; enzyme classes".to_string(),
            elapsed: None,
        });
        client.download_enzyme_classes(enzyme_path.as_std_path())?;

        Ok(OntologyFetchResult {
            go_path: go_path.to_string(),
            go_version,
            enzyme_path: enzyme_path.to_string(),
        })
    }

    fn cached_file(&self, file_name: &str) -> Option<PathBuf> {
        let path = self.store.ontology_path(file_name);
        path.as_std_path()
            .exists()
            .then(|| path.into_std_path_buf())
    }
}
