use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_reference_sync::app::{App, ProgressSink};
use kira_reference_sync::config::{ConfigLoader, ResolvedConfig};
use kira_reference_sync::domain::KEY_FIELD;
use kira_reference_sync::error::KiraError;
use kira_reference_sync::object_store::MemoryStore;
use kira_reference_sync::ontology::KnowledgeHttpClient;
use kira_reference_sync::output::{ConsoleOutput, JsonOutput, OutputMode};
use kira_reference_sync::sifts::{FallbackAlignmentSource, SiftsSummary};
use kira_reference_sync::store::Store;
use kira_reference_sync::uniprot::{FetchBatch, ReferenceFetcher, UniprotHttpClient};

#[derive(Parser)]
#[command(name = "kira-refsync")]
#[command(about = "Reconcile structure cross-references against UniProt")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    cache_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Maintain the UniProt match cache")]
    Cache(CacheArgs),
    #[command(about = "Rewrite reference identifiers and alignments in the collection")]
    Reconcile(ReconcileArgs),
    #[command(about = "Manage ontology files used for annotations")]
    Ontology(OntologyArgs),
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Fetch missing and expired accessions, then purge failures")]
    Update {
        #[arg(long)]
        expire_days: Option<u32>,
    },
    #[command(about = "Re-fetch expired accessions only")]
    Refresh {
        #[arg(long)]
        expire_days: Option<u32>,
        #[arg(long)]
        failure_fraction: Option<f64>,
    },
    #[command(about = "Check the cache against the acceptance thresholds")]
    Test {
        #[arg(long)]
        min_primary_percent: Option<f64>,
    },
    #[command(about = "Count cached accessions by match kind")]
    Summary,
}

#[derive(Args)]
struct ReconcileArgs {
    #[arg(long)]
    annotate: bool,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct OntologyArgs {
    #[command(subcommand)]
    command: OntologyCommand,
}

#[derive(Subcommand)]
enum OntologyCommand {
    #[command(about = "Download the gene ontology and enzyme class files")]
    Fetch,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::ConfigValue { .. }
        | KiraError::CollectionNotFound(_) => 2,
        KiraError::UniprotHttp(_)
        | KiraError::UniprotStatus { .. }
        | KiraError::KnowledgeHttp(_)
        | KiraError::KnowledgeStatus { .. } => 3,
        KiraError::CacheAcceptance { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let default_store = Store::new()?;
    let store = Store::new_with_paths(
        cli.data_dir
            .unwrap_or_else(|| default_store.data_root().to_path_buf()),
        cli.cache_dir
            .unwrap_or_else(|| default_store.cache_root().to_path_buf()),
    );

    match cli.command {
        Commands::Cache(args) => {
            if let CacheCommand::Update { .. } | CacheCommand::Refresh { .. } = args.command {
                let fetcher = UniprotHttpClient::new()?;
                run_cache(args.command, build_app(store, config, fetcher)?, output_mode)
            } else {
                run_cache(args.command, build_app(store, config, NopFetcher)?, output_mode)
            }
        }
        Commands::Reconcile(args) => {
            let data_root = store.data_root().to_path_buf();
            let objects = Arc::new(MemoryStore::load_dir(KEY_FIELD, &data_root)?);
            let fallback = load_fallback(&config)?;
            let app = App::new(store, config, NopFetcher, objects.clone(), fallback);
            let sink: &dyn ProgressSink = match output_mode {
                OutputMode::Interactive => &ConsoleOutput,
                OutputMode::NonInteractive => &JsonOutput,
            };
            let report = app.reconcile(args.annotate, args.dry_run, sink)?;
            if !args.dry_run && report.written > 0 {
                objects.save_dir(&data_root)?;
            }
            match output_mode {
                OutputMode::Interactive => ConsoleOutput::print_transform(&report),
                OutputMode::NonInteractive => {
                    JsonOutput::print_transform(&report).into_diagnostic()?
                }
            }
            if !report.ok {
                return Err(miette::Report::msg("collection write-back failed"));
            }
            Ok(())
        }
        Commands::Ontology(args) => match args.command {
            OntologyCommand::Fetch => {
                let app = build_app(store, config, NopFetcher)?;
                let client = KnowledgeHttpClient::new()?;
                match output_mode {
                    OutputMode::Interactive => {
                        let result = app.fetch_ontology(&client, &ConsoleOutput)?;
                        ConsoleOutput::print_ontology(&result);
                    }
                    OutputMode::NonInteractive => {
                        let result = app.fetch_ontology(&client, &JsonOutput)?;
                        JsonOutput::print_ontology(&result).into_diagnostic()?;
                    }
                }
                Ok(())
            }
        },
    }
}

fn build_app<F: ReferenceFetcher>(
    store: Store,
    config: ResolvedConfig,
    fetcher: F,
) -> Result<App<F>, KiraError> {
    let objects = Arc::new(MemoryStore::load_dir(KEY_FIELD, store.data_root())?);
    let fallback = load_fallback(&config)?;
    Ok(App::new(store, config, fetcher, objects, fallback))
}

fn load_fallback(
    config: &ResolvedConfig,
) -> Result<Option<Arc<dyn FallbackAlignmentSource>>, KiraError> {
    let Some(path) = &config.sifts_path else {
        return Ok(None);
    };
    let summary: Arc<dyn FallbackAlignmentSource> =
        Arc::new(SiftsSummary::from_path(path, config.sifts_abbreviated)?);
    Ok(Some(summary))
}

fn run_cache<F: ReferenceFetcher>(
    command: CacheCommand,
    app: App<F>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match (command, output_mode) {
        (CacheCommand::Update { expire_days }, OutputMode::Interactive) => {
            let result = app.update_cache(expire_days, &ConsoleOutput)?;
            ConsoleOutput::print_update(&result);
        }
        (CacheCommand::Update { expire_days }, OutputMode::NonInteractive) => {
            let result = app.update_cache(expire_days, &JsonOutput)?;
            JsonOutput::print_update(&result).into_diagnostic()?;
        }
        (
            CacheCommand::Refresh {
                expire_days,
                failure_fraction,
            },
            mode,
        ) => match mode {
            OutputMode::Interactive => {
                let result = app.refresh_cache(expire_days, failure_fraction, &ConsoleOutput)?;
                ConsoleOutput::print_refresh(&result);
            }
            OutputMode::NonInteractive => {
                let result = app.refresh_cache(expire_days, failure_fraction, &JsonOutput)?;
                JsonOutput::print_refresh(&result).into_diagnostic()?;
            }
        },
        (CacheCommand::Test { min_primary_percent }, mode) => {
            let result = app.test_cache(min_primary_percent)?;
            match mode {
                OutputMode::Interactive => ConsoleOutput::print_test(&result),
                OutputMode::NonInteractive => JsonOutput::print_test(&result).into_diagnostic()?,
            }
        }
        (CacheCommand::Summary, mode) => {
            let summary = app.summary();
            match mode {
                OutputMode::Interactive => ConsoleOutput::print_match_summary(&summary),
                OutputMode::NonInteractive => {
                    JsonOutput::print_summary(&summary).into_diagnostic()?
                }
            }
        }
    }
    Ok(())
}

struct NopFetcher;

impl ReferenceFetcher for NopFetcher {
    fn fetch_batch(&self, _accessions: &[String]) -> Result<FetchBatch, KiraError> {
        Err(KiraError::UniprotHttp(
            "UniProt client not configured".to_string(),
        ))
    }
}
