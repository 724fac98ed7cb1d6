//! Web search collaborator (Tavily by default).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SearchConfig;
use crate::error::{SageError, Service};
use crate::security::SecretValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SageError>;
}

pub type DynWebSearch = Arc<dyn WebSearch>;

pub struct TavilySearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretValue,
}

impl TavilySearch {
    pub fn new(config: &SearchConfig, api_key: SecretValue) -> Result<Self, SageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| {
                SageError::InvalidConfiguration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            client,
            endpoint: config.base_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SageError> {
        let body = serde_json::json!({
            "api_key": self.api_key.expose(),
            "query": query,
            "max_results": max_results,
            "include_answer": false,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| SageError::upstream(Service::WebSearch, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SageError::http_status(
                Service::WebSearch,
                status.as_u16(),
                &text,
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| SageError::malformed(Service::WebSearch, err.to_string()))?;

        parse_tavily_results(&payload, max_results)
    }
}

/// Results keep provider order. The text comes from `content`, falling back to `snippet`.
fn parse_tavily_results(payload: &Value, max_results: usize) -> Result<Vec<SearchHit>, SageError> {
    let results = payload
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| SageError::malformed(Service::WebSearch, "missing `results` array"))?;

    let text = |item: &Value, key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Ok(results
        .iter()
        .map(|item| {
            let content = text(item, "content");
            SearchHit {
                title: text(item, "title"),
                url: text(item, "url"),
                snippet: if content.is_empty() {
                    text(item, "snippet")
                } else {
                    content
                },
            }
        })
        .filter(|hit| !hit.snippet.is_empty() || !hit.url.is_empty())
        .take(max_results)
        .collect())
}

/// In-memory search for tests and offline runs.
///
/// Seeded queries return their seeded hits; anything else yields one synthetic hit.
pub struct StubSearch {
    seeded: DashMap<String, Vec<SearchHit>>,
}

impl StubSearch {
    pub fn new() -> Self {
        Self {
            seeded: DashMap::new(),
        }
    }

    pub fn seed(&self, query: &str, hits: Vec<SearchHit>) {
        self.seeded.insert(query.trim().to_lowercase(), hits);
    }
}

impl Default for StubSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebSearch for StubSearch {
    fn name(&self) -> &str {
        "stub"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SageError> {
        if let Some(hits) = self.seeded.get(&query.trim().to_lowercase()) {
            return Ok(hits.iter().take(max_results).cloned().collect());
        }

        let slug: String = query
            .split_whitespace()
            .take(6)
            .map(|word| {
                word.chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase()
            })
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>()
            .join("-");

        Ok(vec![SearchHit {
            title: format!("Overview: {}", query.trim()),
            url: format!("https://search.invalid/{slug}"),
            snippet: format!("Offline search placeholder for \"{}\".", query.trim()),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tavily_results_prefer_content_over_snippet() {
        let payload = json!({
            "query": "solid state batteries",
            "results": [
                {"title": "A", "url": "https://a.example", "content": "alpha", "score": 0.9},
                {"title": "B", "url": "https://b.example", "snippet": "beta"},
                {"title": "C", "url": "https://c.example", "content": "gamma"}
            ]
        });

        let hits = parse_tavily_results(&payload, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet, "alpha");
        assert_eq!(hits[1].snippet, "beta");
        assert_eq!(hits[1].url, "https://b.example");
    }

    #[test]
    fn tavily_payload_without_results_is_malformed() {
        let err = parse_tavily_results(&json!({"detail": "unauthorized"}), 3).unwrap_err();
        assert!(matches!(
            err,
            SageError::MalformedResponse {
                service: Service::WebSearch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stub_returns_seeded_hits_case_insensitively() {
        let search = StubSearch::new();
        search.seed(
            "Grid Storage",
            vec![SearchHit {
                title: "Grid".into(),
                url: "https://grid.example".into(),
                snippet: "storage".into(),
            }],
        );

        let hits = search.search("grid storage ", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://grid.example");

        let fallback = search.search("Something else entirely", 3).await.unwrap();
        assert_eq!(fallback[0].url, "https://search.invalid/something-else-entirely");
    }
}
