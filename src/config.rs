use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::store::CacheFormat;

pub const DEFAULT_CONFIG_FILE: &str = "kira-refsync.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub reference_database_name: Option<String>,
    #[serde(default)]
    pub provenance_sources: Option<Vec<String>>,
    #[serde(default)]
    pub excluded_databases: Option<Vec<String>>,
    #[serde(default)]
    pub expire_days: Option<u32>,
    #[serde(default)]
    pub failure_fraction: Option<f64>,
    #[serde(default)]
    pub max_chunk_size: Option<usize>,
    #[serde(default)]
    pub num_proc: Option<usize>,
    #[serde(default)]
    pub sifts_abbreviated: Option<bool>,
    #[serde(default)]
    pub sifts_path: Option<String>,
    #[serde(default)]
    pub go_path: Option<String>,
    #[serde(default)]
    pub enzyme_path: Option<String>,
    #[serde(default)]
    pub cache_format: Option<CacheFormat>,
    #[serde(default)]
    pub min_count: Option<usize>,
    #[serde(default)]
    pub min_match_primary_percent: Option<f64>,
    #[serde(default)]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub reference_database_name: String,
    pub provenance_sources: Vec<String>,
    pub excluded_databases: Vec<String>,
    pub expire_days: u32,
    pub failure_fraction: f64,
    pub max_chunk_size: usize,
    pub num_proc: usize,
    pub sifts_abbreviated: bool,
    pub sifts_path: Option<PathBuf>,
    pub go_path: Option<PathBuf>,
    pub enzyme_path: Option<PathBuf>,
    pub cache_format: CacheFormat,
    pub min_count: usize,
    pub min_match_primary_percent: f64,
    pub collection: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let failure_fraction = config.failure_fraction.unwrap_or(0.75);
        if !(failure_fraction > 0.0 && failure_fraction <= 1.0) {
            return Err(KiraError::ConfigValue {
                field: "failure_fraction".to_string(),
                message: format!("{failure_fraction} is outside (0, 1]"),
            });
        }
        let max_chunk_size = positive("max_chunk_size", config.max_chunk_size.unwrap_or(50))?;
        let num_proc = positive("num_proc", config.num_proc.unwrap_or(2))?;
        let min_match_primary_percent = config.min_match_primary_percent.unwrap_or(50.0);
        if !(0.0..=100.0).contains(&min_match_primary_percent) {
            return Err(KiraError::ConfigValue {
                field: "min_match_primary_percent".to_string(),
                message: format!("{min_match_primary_percent} is outside [0, 100]"),
            });
        }

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            reference_database_name: config
                .reference_database_name
                .unwrap_or_else(|| "UniProt".to_string()),
            provenance_sources: config
                .provenance_sources
                .unwrap_or_else(|| vec!["PDB".to_string()]),
            excluded_databases: config
                .excluded_databases
                .unwrap_or_else(|| vec!["PDB".to_string()]),
            expire_days: config.expire_days.unwrap_or(14),
            failure_fraction,
            max_chunk_size,
            num_proc,
            sifts_abbreviated: config.sifts_abbreviated.unwrap_or(true),
            sifts_path: config.sifts_path.map(PathBuf::from),
            go_path: config.go_path.map(PathBuf::from),
            enzyme_path: config.enzyme_path.map(PathBuf::from),
            cache_format: config.cache_format.unwrap_or(CacheFormat::Json),
            min_count: config.min_count.unwrap_or(1),
            min_match_primary_percent,
            collection: config
                .collection
                .unwrap_or_else(|| "pdbx_core_polymer_entity".to_string()),
        })
    }
}

fn positive(field: &str, value: usize) -> Result<usize, KiraError> {
    if value == 0 {
        return Err(KiraError::ConfigValue {
            field: field.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.reference_database_name, "UniProt");
        assert_eq!(resolved.provenance_sources, vec!["PDB".to_string()]);
        assert_eq!(resolved.expire_days, 14);
        assert_eq!(resolved.failure_fraction, 0.75);
        assert_eq!(resolved.cache_format, CacheFormat::Json);
    }
}
