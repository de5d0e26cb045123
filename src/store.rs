use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use directories::BaseDirs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CacheFormat {
    Json,
    Binary,
}

impl CacheFormat {
    fn extension(self) -> &'static str {
        match self {
            CacheFormat::Json => "json",
            CacheFormat::Binary => "bin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub version: u32,
    pub created: String,
    #[serde(alias = "identifiers")]
    pub mapping: BTreeMap<String, T>,
}

impl<T> Snapshot<T> {
    pub fn new(mapping: BTreeMap<String, T>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            created: chrono::Utc::now().to_rfc3339(),
            mapping,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, KiraError> {
        let cwd = std::env::current_dir().map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let data_root = Utf8PathBuf::from_path_buf(cwd.join("data"))
            .map_err(|_| KiraError::Filesystem("invalid data path".to_string()))?;

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".cache").join("kira-reference-sync"),
                )
                .ok()
            })
            .ok_or_else(|| {
                KiraError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            data_root,
            cache_root,
        })
    }

    pub fn new_with_paths(data_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            data_root,
            cache_root,
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn snapshot_path(&self, name: &str, format: CacheFormat) -> Utf8PathBuf {
        self.cache_root
            .join("snapshots")
            .join(format!("{name}.{}", format.extension()))
    }

    pub fn ontology_path(&self, file_name: &str) -> Utf8PathBuf {
        self.cache_root.join("ontology").join(file_name)
    }

    pub fn ensure_cache_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn write_snapshot<T: Serialize>(
        &self,
        name: &str,
        format: CacheFormat,
        snapshot: &Snapshot<T>,
    ) -> Result<Utf8PathBuf, KiraError> {
        let path = self.snapshot_path(name, format);
        let content = match format {
            CacheFormat::Json => serde_json::to_vec_pretty(snapshot)
                .map_err(|err| KiraError::CacheSnapshot(err.to_string()))?,
            CacheFormat::Binary => bincode::serialize(snapshot)
                .map_err(|err| KiraError::CacheSnapshot(err.to_string()))?,
        };
        Self::write_bytes_atomic(&path, &content)?;
        Ok(path)
    }

    pub fn read_snapshot<T: DeserializeOwned>(
        &self,
        name: &str,
        format: CacheFormat,
    ) -> Result<Option<Snapshot<T>>, KiraError> {
        let path = self.snapshot_path(name, format);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content =
            fs::read(path.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let snapshot = match format {
            CacheFormat::Json => serde_json::from_slice(&content)
                .map_err(|err| KiraError::CacheSnapshot(format!("{path}: {err}")))?,
            CacheFormat::Binary => bincode::deserialize(&content)
                .map_err(|err| KiraError::CacheSnapshot(format!("{path}: {err}")))?,
        };
        Ok(Some(snapshot))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("kira-refsync")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        std::io::Write::write_all(&mut temp, content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new_with_paths("data".into(), "cache".into());
        let path = store.snapshot_path("uniprot-match", CacheFormat::Json);
        assert!(path.ends_with("snapshots/uniprot-match.json"));
        let path = store.snapshot_path("uniprot-match", CacheFormat::Binary);
        assert!(path.ends_with("snapshots/uniprot-match.bin"));
    }
}
