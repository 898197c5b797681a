//! Fetch adapters: per-search-term retrieval of raw job postings.
//!
//! Adapters only fetch and decode. Validation and deduplication happen downstream, and only
//! on batches that were fetched successfully.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use jz_core::RawJob;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "jz-adapters";

pub const DEFAULT_API_URL: &str = "https://portal.api.gupy.io/api/job";
pub const DEFAULT_PAGE_LIMIT: usize = 800;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response for `{term}`: {source}")]
    Decode {
        term: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Response envelope shared by the API and fixture files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPage {
    #[serde(default)]
    pub data: Vec<RawJob>,
}

/// Raw jobs returned for one search term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermBatch {
    pub term: String,
    pub jobs: Vec<RawJob>,
    pub failed: bool,
}

#[async_trait]
pub trait JobSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_term(&self, term: &str) -> Result<Vec<RawJob>, FetchError>;
}

/// Fetch every term in order. A failing term is logged and yields an empty batch.
pub async fn fetch_all(source: &dyn JobSource, terms: &[String]) -> Vec<TermBatch> {
    let mut batches = Vec::with_capacity(terms.len());
    for term in terms {
        let span = info_span!("fetch_term", source = source.source_id(), term = %term);
        match source.fetch_term(term).instrument(span).await {
            Ok(jobs) => {
                info!(term = %term, jobs = jobs.len(), "term fetched");
                batches.push(TermBatch {
                    term: term.clone(),
                    jobs,
                    failed: false,
                });
            }
            Err(err) => {
                warn!(term = %term, error = %err, "term fetch failed; contributing no records");
                batches.push(TermBatch {
                    term: term.clone(),
                    jobs: Vec::new(),
                    failed: true,
                });
            }
        }
    }
    batches
}

#[derive(Debug, Clone)]
pub struct ApiSourceConfig {
    pub api_url: String,
    pub page_limit: usize,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ApiSourceConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            page_limit: DEFAULT_PAGE_LIMIT,
            timeout: Duration::from_secs(20),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Public job search API. Reads the first page only; `offset` is always zero.
#[derive(Debug, Clone)]
pub struct GupyApiSource {
    client: reqwest::Client,
    config: ApiSourceConfig,
}

impl GupyApiSource {
    pub fn new(config: ApiSourceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building reqwest client")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiSourceConfig {
        &self.config
    }
}

#[async_trait]
impl JobSource for GupyApiSource {
    fn source_id(&self) -> &'static str {
        "gupy-api"
    }

    async fn fetch_term(&self, term: &str) -> Result<Vec<RawJob>, FetchError> {
        let limit = self.config.page_limit.to_string();
        let resp = self
            .client
            .get(&self.config.api_url)
            .query(&[("name", term), ("offset", "0"), ("limit", limit.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }

        let body = resp.bytes().await?;
        decode_page(term, &body)
    }
}

/// Reads `<dir>/<term>.json` files holding the API envelope. Missing files are empty results.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    dir: PathBuf,
}

impl FixtureSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, term: &str) -> PathBuf {
        self.dir.join(format!("{term}.json"))
    }
}

#[async_trait]
impl JobSource for FixtureSource {
    fn source_id(&self) -> &'static str {
        "fixtures"
    }

    async fn fetch_term(&self, term: &str) -> Result<Vec<RawJob>, FetchError> {
        let path = self.path_for(term);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        decode_page(term, &bytes)
    }
}

fn decode_page(term: &str, bytes: &[u8]) -> Result<Vec<RawJob>, FetchError> {
    let page: JobPage = serde_json::from_slice(bytes).map_err(|source| FetchError::Decode {
        term: term.to_string(),
        source,
    })?;
    Ok(page.data)
}
