use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid entity key: {0}")]
    InvalidEntityKey(String),

    #[error("invalid UniProt accession: {0}")]
    InvalidUniprotId(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value for {field}: {message}")]
    ConfigValue { field: String, message: String },

    #[error("uniprot request failed: {0}")]
    UniprotHttp(String),

    #[error("uniprot returned status {status}: {message}")]
    UniprotStatus { status: u16, message: String },

    #[error("knowledge base request failed: {0}")]
    KnowledgeHttp(String),

    #[error("knowledge base returned status {status}: {message}")]
    KnowledgeStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("cache snapshot error: {0}")]
    CacheSnapshot(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("malformed document {key}: {message}")]
    MalformedDocument { key: String, message: String },

    #[error("failed to read SIFTS mapping: {0}")]
    Sifts(String),

    #[error("failed to parse ontology: {0}")]
    Ontology(String),

    #[error("worker pool failed: {0}")]
    WorkerPool(String),

    #[error(
        "match cache failed acceptance: {count} records, {primary_percent:.1}% primary (need {min_count} and {min_percent:.1}%)"
    )]
    CacheAcceptance {
        count: usize,
        primary_percent: f64,
        min_count: usize,
        min_percent: f64,
    },
}
