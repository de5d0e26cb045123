use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::domain::AlignedRange;
use crate::error::KiraError;

pub const SIFTS_PROVENANCE: &str = "SIFTS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAlignment {
    pub chain_id: String,
    pub accession: String,
    pub regions: Vec<AlignedRange>,
}

impl ChainAlignment {
    pub fn aligned_length(&self) -> u64 {
        self.regions.iter().map(|region| region.length).sum()
    }
}

pub trait FallbackAlignmentSource: Send + Sync {
    fn longest_alignments(&self, entry_id: &str, chain_ids: &[String]) -> Vec<ChainAlignment>;

    fn identifiers(&self) -> BTreeSet<String>;
}

#[derive(Debug, Clone, Default)]
pub struct SiftsSummary {
    abbreviated: bool,
    chains: BTreeMap<(String, String), BTreeMap<String, Vec<AlignedRange>>>,
}

impl SiftsSummary {
    pub fn new(abbreviated: bool) -> Self {
        Self {
            abbreviated,
            chains: BTreeMap::new(),
        }
    }

    pub fn from_path(path: &Path, abbreviated: bool) -> Result<Self, KiraError> {
        let file = File::open(path)
            .map_err(|err| KiraError::Sifts(format!("open {}: {err}", path.display())))?;
        let reader: Box<dyn Read> = if path.extension().map(|ext| ext == "gz").unwrap_or(false) {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let summary = Self::from_reader(BufReader::new(reader), abbreviated)?;
        info!(
            path = %path.display(),
            chains = summary.chains.len(),
            abbreviated,
            "loaded SIFTS summary"
        );
        Ok(summary)
    }

    pub fn from_reader<R: BufRead>(reader: R, abbreviated: bool) -> Result<Self, KiraError> {
        let mut summary = Self::new(abbreviated);
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| KiraError::Sifts(err.to_string()))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("PDB") {
                continue;
            }
            let fields: Vec<&str> = trimmed.split('\t').collect();
            if fields.len() < 9 {
                return Err(KiraError::Sifts(format!(
                    "line {}: expected 9 columns, found {}",
                    index + 1,
                    fields.len()
                )));
            }
            let parse = |value: &str| -> Result<u64, KiraError> {
                value.trim().parse::<u64>().map_err(|err| {
                    KiraError::Sifts(format!("line {}: {value:?}: {err}", index + 1))
                })
            };
            let res_beg = parse(fields[3])?;
            let res_end = parse(fields[4])?;
            let sp_beg = parse(fields[7])?;
            if res_end < res_beg {
                debug!(line = index + 1, "skipping inverted SIFTS segment");
                continue;
            }
            summary.add_segment(
                fields[0],
                fields[1],
                fields[2],
                AlignedRange {
                    entity_beg_seq_id: res_beg,
                    ref_beg_seq_id: sp_beg,
                    length: res_end - res_beg + 1,
                },
            );
        }
        Ok(summary)
    }

    pub fn add_segment(&mut self, entry_id: &str, chain_id: &str, accession: &str, range: AlignedRange) {
        let segments = self
            .chains
            .entry((entry_id.to_uppercase(), chain_id.to_string()))
            .or_default()
            .entry(accession.to_string())
            .or_default();
        if self.abbreviated {
            let keep_existing = segments
                .first()
                .map(|existing| existing.length >= range.length)
                .unwrap_or(false);
            if !keep_existing {
                *segments = vec![range];
            }
        } else if !segments.contains(&range) {
            segments.push(range);
            segments.sort_by_key(|segment| segment.entity_beg_seq_id);
        }
    }

    pub fn is_abbreviated(&self) -> bool {
        self.abbreviated
    }
}

impl FallbackAlignmentSource for SiftsSummary {
    fn longest_alignments(&self, entry_id: &str, chain_ids: &[String]) -> Vec<ChainAlignment> {
        let entry_id = entry_id.to_uppercase();
        let mut alignments = Vec::new();
        for chain_id in chain_ids {
            let Some(by_accession) = self.chains.get(&(entry_id.clone(), chain_id.clone())) else {
                continue;
            };
            let best = by_accession
                .iter()
                .map(|(accession, regions)| ChainAlignment {
                    chain_id: chain_id.clone(),
                    accession: accession.clone(),
                    regions: regions.clone(),
                })
                // Ties resolve to the lexically smallest accession.
                .fold(None::<ChainAlignment>, |best, candidate| match best {
                    Some(current) if current.aligned_length() >= candidate.aligned_length() => {
                        Some(current)
                    }
                    _ => Some(candidate),
                });
            if let Some(best) = best {
                alignments.push(best);
            }
        }
        alignments
    }

    fn identifiers(&self) -> BTreeSet<String> {
        self.chains
            .values()
            .flat_map(|by_accession| by_accession.keys().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "# 2024/01/01\n\
PDB\tCHAIN\tSP_PRIMARY\tRES_BEG\tRES_END\tPDB_BEG\tPDB_END\tSP_BEG\tSP_END\n\
1abc\tA\tP69905\t1\t141\t1\t141\t2\t142\n\
1abc\tA\tP69905\t150\t160\t150\t160\t200\t210\n\
1abc\tA\tQ00001\t1\t20\t1\t20\t1\t20\n";

    #[test]
    fn abbreviated_keeps_longest_segment() {
        let summary = SiftsSummary::from_reader(TABLE.as_bytes(), true).unwrap();
        let found = summary.longest_alignments("1ABC", &["A".to_string()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].accession, "P69905");
        assert_eq!(found[0].regions.len(), 1);
        assert_eq!(found[0].regions[0].length, 141);
    }

    #[test]
    fn full_mode_keeps_every_segment() {
        let summary = SiftsSummary::from_reader(TABLE.as_bytes(), false).unwrap();
        let found = summary.longest_alignments("1abc", &["A".to_string(), "B".to_string()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].regions.len(), 2);
        assert_eq!(
            summary.identifiers().into_iter().collect::<Vec<_>>(),
            vec!["P69905".to_string(), "Q00001".to_string()]
        );
    }
}
