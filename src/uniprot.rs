use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, LINK, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::domain::{CrossReference, MatchRecord, ReferenceRecord, UniprotId};
use crate::error::KiraError;

const KEPT_XREF_DATABASES: &[&str] = &[
    "GO", "Pfam", "InterPro", "PDB", "RefSeq", "GeneID", "EMBL", "PIR",
];

const PAGE_SIZE: &str = "500";

static NEXT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).unwrap());

#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub records: BTreeMap<String, ReferenceRecord>,
    pub matches: BTreeMap<String, MatchRecord>,
}

pub trait ReferenceFetcher: Send + Sync {
    fn fetch_batch(&self, accessions: &[String]) -> Result<FetchBatch, KiraError>;
}

impl<T: ReferenceFetcher + ?Sized> ReferenceFetcher for &T {
    fn fetch_batch(&self, accessions: &[String]) -> Result<FetchBatch, KiraError> {
        (**self).fetch_batch(accessions)
    }
}

#[derive(Clone)]
pub struct UniprotHttpClient {
    client: Client,
    base_url: String,
}

impl UniprotHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Self::with_base_url("https://rest.uniprot.org")
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-refsync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::UniprotHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| KiraError::UniprotHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::UniprotHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "UniProt request failed".to_string());
        Err(KiraError::UniprotStatus { status, message })
    }

    fn search_url(&self) -> String {
        format!("{}/uniprotkb/search", self.base_url)
    }
}

impl ReferenceFetcher for UniprotHttpClient {
    fn fetch_batch(&self, accessions: &[String]) -> Result<FetchBatch, KiraError> {
        if accessions.is_empty() {
            return Ok(FetchBatch::default());
        }
        let url = self.search_url();
        let query = accession_query(accessions);

        let response = self.send_with_retries(|| {
            self.client.get(&url).query(&[
                ("query", query.as_str()),
                ("format", "json"),
                ("size", PAGE_SIZE),
            ])
        })?;
        let mut response = Self::handle_status(response)?;
        let mut results = Vec::new();
        let mut pages = 0usize;
        loop {
            pages += 1;
            let next = next_page_url(
                response
                    .headers()
                    .get(LINK)
                    .and_then(|value| value.to_str().ok()),
            );
            let page: Value = response
                .json()
                .map_err(|err| KiraError::UniprotHttp(err.to_string()))?;
            if let Some(entries) = page.get("results").and_then(|v| v.as_array()) {
                results.extend(entries.iter().cloned());
            }
            let Some(next) = next else {
                break;
            };
            response = Self::handle_status(self.send_with_retries(|| self.client.get(&next))?)?;
        }
        let raw = serde_json::json!({ "results": results });

        let batch = parse_search_results(accessions, &raw);
        debug!(
            requested = accessions.len(),
            matched = batch.matches.len(),
            records = batch.records.len(),
            pages,
            "uniprot batch fetched"
        );
        Ok(batch)
    }
}

pub fn accession_query(accessions: &[String]) -> String {
    let bases: BTreeSet<String> = accessions.iter().map(|id| base_accession(id)).collect();
    bases
        .iter()
        .map(|id| format!("accession:{id} OR sec_acc:{id}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

pub fn next_page_url(link: Option<&str>) -> Option<String> {
    let link = link?;
    NEXT_LINK
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|url| url.as_str().to_string())
}

fn base_accession(accession: &str) -> String {
    accession
        .parse::<UniprotId>()
        .map(|id| id.base().to_string())
        .unwrap_or_else(|_| accession.to_string())
}

pub fn parse_search_results(requested: &[String], raw: &Value) -> FetchBatch {
    let mut records = BTreeMap::new();
    if let Some(results) = raw.get("results").and_then(|v| v.as_array()) {
        for entry in results {
            if let Some(record) = extract_reference_record(entry) {
                records.insert(record.accession.clone(), record);
            }
        }
    }
    let matches = classify_matches(requested, &records);
    FetchBatch { records, matches }
}

pub fn classify_matches(
    requested: &[String],
    records: &BTreeMap<String, ReferenceRecord>,
) -> BTreeMap<String, MatchRecord> {
    let mut matches = BTreeMap::new();
    for accession in requested {
        let base = base_accession(accession);
        if let Some(record) = records.get(&base) {
            matches.insert(
                accession.clone(),
                MatchRecord::primary(accession, record.tax_id),
            );
            continue;
        }
        let successors: Vec<(String, Option<u64>)> = records
            .values()
            .filter(|record| record.secondary_accessions.contains(&base))
            .map(|record| (record.accession.clone(), record.tax_id))
            .collect();
        if !successors.is_empty() {
            matches.insert(accession.clone(), MatchRecord::secondary(successors));
        }
    }
    matches
}

pub fn extract_reference_record(raw: &Value) -> Option<ReferenceRecord> {
    let accession = raw
        .get("primaryAccession")
        .and_then(|v| v.as_str())?
        .to_string();
    let secondary_accessions = raw
        .get("secondaryAccessions")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|v| v.to_string())
                .collect()
        })
        .unwrap_or_default();
    let entry_name = raw
        .get("uniProtkbId")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());
    let protein_name = raw
        .get("proteinDescription")
        .and_then(|v| v.get("recommendedName"))
        .and_then(|v| v.get("fullName"))
        .and_then(|v| v.get("value"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .or_else(|| {
            raw.get("proteinDescription")
                .and_then(|v| v.get("submissionNames"))
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|v| v.get("fullName"))
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
        });

    let mut ec_numbers = Vec::new();
    if let Some(description) = raw.get("proteinDescription") {
        let mut names = Vec::new();
        if let Some(name) = description.get("recommendedName") {
            names.push(name);
        }
        for key in ["alternativeNames", "submissionNames"] {
            if let Some(items) = description.get(key).and_then(|v| v.as_array()) {
                names.extend(items.iter());
            }
        }
        for name in names {
            if let Some(numbers) = name.get("ecNumbers").and_then(|v| v.as_array()) {
                for number in numbers {
                    if let Some(value) = number.get("value").and_then(|v| v.as_str()) {
                        ec_numbers.push(value.to_string());
                    }
                }
            }
        }
    }
    ec_numbers.sort();
    ec_numbers.dedup();

    let mut gene_names = Vec::new();
    if let Some(genes) = raw.get("genes").and_then(|v| v.as_array()) {
        for gene in genes {
            if let Some(name) = gene
                .get("geneName")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
            {
                gene_names.push(name.to_string());
            }
            if let Some(syns) = gene.get("synonyms").and_then(|v| v.as_array()) {
                for syn in syns {
                    if let Some(name) = syn.get("value").and_then(|v| v.as_str()) {
                        gene_names.push(name.to_string());
                    }
                }
            }
        }
    }
    gene_names.sort();
    gene_names.dedup();

    let organism = raw
        .get("organism")
        .and_then(|v| v.get("scientificName"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());
    let tax_id = raw
        .get("organism")
        .and_then(|v| v.get("taxonId"))
        .and_then(|v| v.as_u64());
    let sequence = raw
        .get("sequence")
        .and_then(|v| v.get("value"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());
    let sequence_length = raw
        .get("sequence")
        .and_then(|v| v.get("length"))
        .and_then(|v| v.as_u64());

    let mut cross_references = Vec::new();
    if let Some(xrefs) = raw
        .get("uniProtKBCrossReferences")
        .and_then(|v| v.as_array())
    {
        for xref in xrefs {
            let database = xref.get("database").and_then(|v| v.as_str()).unwrap_or("");
            let Some(id) = xref.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            if !KEPT_XREF_DATABASES.contains(&database) {
                continue;
            }
            let mut properties = BTreeMap::new();
            if let Some(props) = xref.get("properties").and_then(|v| v.as_array()) {
                for prop in props {
                    let key = prop.get("key").and_then(|v| v.as_str());
                    let value = prop.get("value").and_then(|v| v.as_str());
                    if let (Some(key), Some(value)) = (key, value) {
                        properties.insert(key.to_string(), value.to_string());
                    }
                }
            }
            cross_references.push(CrossReference {
                database: database.to_string(),
                id: id.to_string(),
                properties,
            });
        }
    }

    Some(ReferenceRecord {
        accession,
        secondary_accessions,
        entry_name,
        protein_name,
        gene_names,
        organism,
        tax_id,
        sequence,
        sequence_length,
        ec_numbers,
        cross_references,
    })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
