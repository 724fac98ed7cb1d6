//! Encyclopedia lookup collaborator (MediaWiki / Wikipedia by default).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EncyclopediaConfig;
use crate::error::{SageError, Service};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncyclopediaEntry {
    pub title: String,
    pub url: String,
    pub excerpt: String,
}

#[async_trait]
pub trait Encyclopedia: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup(&self, query: &str, max_docs: usize)
    -> Result<Vec<EncyclopediaEntry>, SageError>;
}

pub type DynEncyclopedia = Arc<dyn Encyclopedia>;

pub struct WikipediaClient {
    client: reqwest::Client,
    endpoint: String,
    max_chars: usize,
}

impl WikipediaClient {
    pub fn new(config: &EncyclopediaConfig) -> Result<Self, SageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("sage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                SageError::InvalidConfiguration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            client,
            endpoint: config.base_url.clone(),
            max_chars: config.max_chars,
        })
    }
}

#[async_trait]
impl Encyclopedia for WikipediaClient {
    fn name(&self) -> &str {
        "wikipedia"
    }

    async fn lookup(
        &self,
        query: &str,
        max_docs: usize,
    ) -> Result<Vec<EncyclopediaEntry>, SageError> {
        let limit = max_docs.max(1).to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("formatversion", "2"),
                ("generator", "search"),
                ("gsrsearch", query),
                ("gsrlimit", limit.as_str()),
                ("prop", "extracts|info"),
                ("inprop", "url"),
                ("explaintext", "1"),
                ("exintro", "1"),
                ("redirects", "1"),
            ])
            .send()
            .await
            .map_err(|err| SageError::upstream(Service::Encyclopedia, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SageError::http_status(
                Service::Encyclopedia,
                status.as_u16(),
                &text,
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| SageError::malformed(Service::Encyclopedia, err.to_string()))?;

        parse_mediawiki_pages(&payload, max_docs, self.max_chars)
    }
}

/// Pages come back unordered; `index` carries the search rank.
fn parse_mediawiki_pages(
    payload: &Value,
    max_docs: usize,
    max_chars: usize,
) -> Result<Vec<EncyclopediaEntry>, SageError> {
    if let Some(error) = payload.get("error") {
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(SageError::upstream(Service::Encyclopedia, info.to_string()));
    }

    // No `query` key means the search matched nothing.
    let pages = match payload.get("query").and_then(|query| query.get("pages")) {
        Some(Value::Array(pages)) => pages.clone(),
        Some(Value::Object(map)) => map.values().cloned().collect(),
        Some(_) => {
            return Err(SageError::malformed(
                Service::Encyclopedia,
                "`query.pages` is neither a list nor a map",
            ));
        }
        None => return Ok(Vec::new()),
    };

    let mut ranked: Vec<(u64, EncyclopediaEntry)> = pages
        .iter()
        .filter(|page| page.get("missing").is_none())
        .map(|page| {
            let rank = page.get("index").and_then(Value::as_u64).unwrap_or(u64::MAX);
            let title = page
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let url = page
                .get("fullurl")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!("https://en.wikipedia.org/wiki/{}", title.replace(' ', "_"))
                });
            let excerpt: String = page
                .get("extract")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .chars()
                .take(max_chars)
                .collect();
            (rank, EncyclopediaEntry { title, url, excerpt })
        })
        .collect();

    ranked.sort_by_key(|(rank, _)| *rank);

    Ok(ranked
        .into_iter()
        .map(|(_, entry)| entry)
        .filter(|entry| !entry.excerpt.trim().is_empty())
        .take(max_docs)
        .collect())
}

/// Simple in-memory encyclopedia for tests and offline runs.
pub struct StubEncyclopedia {
    articles: DashMap<String, EncyclopediaEntry>,
}

impl StubEncyclopedia {
    pub fn new() -> Self {
        Self {
            articles: DashMap::new(),
        }
    }

    pub fn insert(&self, entry: EncyclopediaEntry) {
        self.articles.insert(entry.title.to_lowercase(), entry);
    }
}

impl Default for StubEncyclopedia {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Encyclopedia for StubEncyclopedia {
    fn name(&self) -> &str {
        "stub"
    }

    async fn lookup(
        &self,
        query: &str,
        max_docs: usize,
    ) -> Result<Vec<EncyclopediaEntry>, SageError> {
        let needle = query.to_lowercase();
        let mut hits: Vec<EncyclopediaEntry> = self
            .articles
            .iter()
            .filter(|entry| needle.contains(entry.key().as_str()))
            .map(|entry| entry.value().clone())
            .collect();
        hits.sort_by(|a, b| a.title.cmp(&b.title));
        hits.truncate(max_docs);
        Ok(hits)
    }
}
