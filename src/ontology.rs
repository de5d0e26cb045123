use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use camino::Utf8Path;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::info;

use crate::error::KiraError;
use crate::store::Store;

pub const GO_URL: &str = "http://purl.obolibrary.org/obo/go/go-basic.obo";
pub const ENZYME_CLASS_URL: &str = "https://ftp.expasy.org/databases/enzyme/enzclass.txt";

static ENZYME_CLASS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\.\s*(\d+|-)\.\s*(\d+|-)\.\s*(\d+|-)\s+(.+?)\s*$").unwrap()
});

pub trait KnowledgeClient: Send + Sync {
    fn download_go(&self, destination: &Path) -> Result<Vec<u8>, KiraError>;
    fn download_enzyme_classes(&self, destination: &Path) -> Result<Vec<u8>, KiraError>;
}

#[derive(Clone)]
pub struct KnowledgeHttpClient {
    client: Client,
    go_url: String,
    enzyme_url: String,
}

impl KnowledgeHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Self::with_urls(GO_URL, ENZYME_CLASS_URL)
    }

    pub fn with_urls(go_url: &str, enzyme_url: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-refsync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::KnowledgeHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::KnowledgeHttp(err.to_string()))?;
        Ok(Self {
            client,
            go_url: go_url.to_string(),
            enzyme_url: enzyme_url.to_string(),
        })
    }

    fn download(&self, url: &str, destination: &Path) -> Result<Vec<u8>, KiraError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::KnowledgeHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "knowledge base request failed".to_string());
            return Err(KiraError::KnowledgeStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| KiraError::KnowledgeHttp(err.to_string()))?;
        let destination = Utf8Path::from_path(destination).ok_or_else(|| {
            KiraError::Filesystem(format!("non UTF-8 path: {}", destination.display()))
        })?;
        Store::write_bytes_atomic(destination, &bytes)?;
        Ok(bytes.to_vec())
    }
}

impl KnowledgeClient for KnowledgeHttpClient {
    fn download_go(&self, destination: &Path) -> Result<Vec<u8>, KiraError> {
        self.download(&self.go_url, destination)
    }

    fn download_enzyme_classes(&self, destination: &Path) -> Result<Vec<u8>, KiraError> {
        self.download(&self.enzyme_url, destination)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageItem {
    pub id: String,
    pub name: Option<String>,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GoTerm {
    name: String,
    parents: Vec<String>,
    obsolete: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GeneOntology {
    version: Option<String>,
    terms: BTreeMap<String, GoTerm>,
}

impl GeneOntology {
    pub fn from_path(path: &Path) -> Result<Self, KiraError> {
        let content = fs::read(path)
            .map_err(|err| KiraError::Ontology(format!("{}: {err}", path.display())))?;
        let ontology = Self::parse(&content)?;
        info!(
            path = %path.display(),
            terms = ontology.terms.len(),
            version = ontology.version.as_deref().unwrap_or("unknown"),
            "loaded gene ontology"
        );
        Ok(ontology)
    }

    pub fn parse(content: &[u8]) -> Result<Self, KiraError> {
        let (version, _) = parse_go_header(content);
        let text = String::from_utf8_lossy(content);
        let mut terms = BTreeMap::new();
        let mut current: Option<(String, GoTerm)> = None;
        let mut in_term = false;

        for line in text.lines() {
            let line = line.trim();
            if line.starts_with('[') {
                if let Some((id, term)) = current.take() {
                    terms.insert(id, term);
                }
                in_term = line == "[Term]";
                continue;
            }
            if !in_term {
                continue;
            }
            if let Some(value) = line.strip_prefix("id:") {
                if let Some((id, term)) = current.take() {
                    terms.insert(id, term);
                }
                current = Some((
                    value.trim().to_string(),
                    GoTerm {
                        name: String::new(),
                        parents: Vec::new(),
                        obsolete: false,
                    },
                ));
                continue;
            }
            let Some((_, term)) = current.as_mut() else {
                continue;
            };
            if let Some(value) = line.strip_prefix("name:") {
                term.name = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("is_a:") {
                let parent = value.split('!').next().unwrap_or("").trim();
                if !parent.is_empty() {
                    term.parents.push(parent.to_string());
                }
            } else if line == "is_obsolete: true" {
                term.obsolete = true;
            }
        }
        if let Some((id, term)) = current.take() {
            terms.insert(id, term);
        }
        if terms.is_empty() {
            return Err(KiraError::Ontology("no [Term] stanzas found".to_string()));
        }
        Ok(Self { version, terms })
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn name(&self, id: &str) -> Option<&str> {
        self.terms.get(id).map(|term| term.name.as_str())
    }

    pub fn is_obsolete(&self, id: &str) -> bool {
        self.terms.get(id).map(|term| term.obsolete).unwrap_or(false)
    }

    /// The term and all of its `is_a` ancestors. Depth counts from the
    /// namespace root, which has depth 1.
    pub fn lineage(&self, id: &str) -> Vec<LineageItem> {
        if !self.terms.contains_key(id) {
            return Vec::new();
        }
        let mut ancestors = BTreeSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if !ancestors.insert(current.clone()) {
                continue;
            }
            if let Some(term) = self.terms.get(&current) {
                stack.extend(term.parents.iter().cloned());
            }
        }

        let mut depths = BTreeMap::new();
        let mut items: Vec<LineageItem> = ancestors
            .iter()
            .map(|ancestor| LineageItem {
                id: ancestor.clone(),
                name: self.name(ancestor).map(|name| name.to_string()),
                depth: self.depth(ancestor, &mut depths, &mut BTreeSet::new()),
            })
            .collect();
        items.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id.cmp(&b.id)));
        items
    }

    fn depth(
        &self,
        id: &str,
        memo: &mut BTreeMap<String, u32>,
        visiting: &mut BTreeSet<String>,
    ) -> u32 {
        if let Some(depth) = memo.get(id) {
            return *depth;
        }
        if !visiting.insert(id.to_string()) {
            return 1;
        }
        let parents = self
            .terms
            .get(id)
            .map(|term| term.parents.clone())
            .unwrap_or_default();
        let depth = parents
            .iter()
            .map(|parent| self.depth(parent, memo, visiting) + 1)
            .min()
            .unwrap_or(1);
        visiting.remove(id);
        memo.insert(id.to_string(), depth);
        depth
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnzymeClassTree {
    names: BTreeMap<String, String>,
}

impl EnzymeClassTree {
    pub fn from_path(path: &Path) -> Result<Self, KiraError> {
        let content = fs::read(path)
            .map_err(|err| KiraError::Ontology(format!("{}: {err}", path.display())))?;
        let tree = Self::parse(&content);
        info!(path = %path.display(), classes = tree.names.len(), "loaded enzyme classes");
        Ok(tree)
    }

    pub fn parse(content: &[u8]) -> Self {
        let text = String::from_utf8_lossy(content);
        let mut names = BTreeMap::new();
        for line in text.lines() {
            let Some(caps) = ENZYME_CLASS_LINE.captures(line) else {
                continue;
            };
            let parts: Vec<&str> = (1..=4)
                .filter_map(|index| caps.get(index).map(|m| m.as_str()))
                .take_while(|part| *part != "-")
                .collect();
            let name = caps.get(5).map(|m| m.as_str()).unwrap_or("");
            names.insert(parts.join("."), name.trim_end_matches('.').to_string());
        }
        Self { names }
    }

    pub fn name(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(|name| name.as_str())
    }

    pub fn lineage(&self, ec_number: &str) -> Vec<LineageItem> {
        let parts: Vec<&str> = ec_number
            .trim()
            .split('.')
            .map(|part| part.trim())
            .take_while(|part| !part.is_empty() && *part != "-")
            .collect();
        (1..=parts.len())
            .map(|depth| {
                let id = parts[..depth].join(".");
                LineageItem {
                    name: self.name(&id).map(|name| name.to_string()),
                    id,
                    depth: depth as u32,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationResources {
    pub go: Option<GeneOntology>,
    pub enzyme: Option<EnzymeClassTree>,
}

impl AnnotationResources {
    pub fn load(go_path: Option<&Path>, enzyme_path: Option<&Path>) -> Result<Self, KiraError> {
        let go = go_path.map(GeneOntology::from_path).transpose()?;
        let enzyme = enzyme_path.map(EnzymeClassTree::from_path).transpose()?;
        Ok(Self { go, enzyme })
    }
}

pub fn parse_go_header(content: &[u8]) -> (Option<String>, Option<String>) {
    let mut version = None;
    let mut date = None;
    let text = String::from_utf8_lossy(content);
    for line in text.lines().take(50) {
        if let Some(value) = line.strip_prefix("data-version:") {
            version = Some(value.trim().to_string());
        }
        if let Some(value) = line.strip_prefix("date:") {
            date = Some(value.trim().to_string());
        }
    }
    (version, date)
}
