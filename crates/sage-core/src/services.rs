use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::{Config, STUB_PROVIDER};
use crate::encyclopedia::{DynEncyclopedia, EncyclopediaEntry, StubEncyclopedia, WikipediaClient};
use crate::error::{SageError, Service};
use crate::llm::{ChatRequest, DynChatModel, OpenAiCompatibleChat, StubChat};
use crate::metrics::record_external_call;
use crate::search::{DynWebSearch, SearchHit, StubSearch, TavilySearch};

/// The external collaborators a report session talks to.
#[derive(Clone)]
pub struct Services {
    pub chat: DynChatModel,
    pub search: DynWebSearch,
    pub encyclopedia: DynEncyclopedia,
}

impl Services {
    pub fn new(chat: DynChatModel, search: DynWebSearch, encyclopedia: DynEncyclopedia) -> Self {
        Self {
            chat,
            search,
            encyclopedia,
        }
    }

    /// Deterministic in-process services; no network access.
    pub fn offline() -> Self {
        Self::new(
            Arc::new(StubChat::new()),
            Arc::new(StubSearch::new()),
            Arc::new(StubEncyclopedia::new()),
        )
    }

    /// Build the live clients named in the configuration. Secrets come from the environment.
    pub fn from_config(config: &Config) -> Result<Self, SageError> {
        let chat: DynChatModel = match config.llm.provider.as_str() {
            STUB_PROVIDER => Arc::new(StubChat::new()),
            "groq" | "openai" | "openai-compatible" => Arc::new(OpenAiCompatibleChat::new(
                &config.llm,
                config.llm_api_key()?,
            )?),
            other => {
                return Err(SageError::InvalidConfiguration(format!(
                    "unknown llm.provider `{other}` (expected groq, openai, openai-compatible or stub)"
                )));
            }
        };

        let search: DynWebSearch = match config.search.provider.as_str() {
            STUB_PROVIDER => Arc::new(StubSearch::new()),
            "tavily" => Arc::new(TavilySearch::new(&config.search, config.search_api_key()?)?),
            other => {
                return Err(SageError::InvalidConfiguration(format!(
                    "unknown search.provider `{other}` (expected tavily or stub)"
                )));
            }
        };

        let encyclopedia: DynEncyclopedia = match config.encyclopedia.provider.as_str() {
            STUB_PROVIDER => Arc::new(StubEncyclopedia::new()),
            "wikipedia" | "mediawiki" => Arc::new(WikipediaClient::new(&config.encyclopedia)?),
            other => {
                return Err(SageError::InvalidConfiguration(format!(
                    "unknown encyclopedia.provider `{other}` (expected wikipedia or stub)"
                )));
            }
        };

        debug!(
            chat = chat.name(),
            search = search.name(),
            encyclopedia = encyclopedia.name(),
            "services configured"
        );

        Ok(Self::new(chat, search, encyclopedia))
    }

    pub(crate) async fn ask(&self, request: ChatRequest) -> Result<String, SageError> {
        let started = Instant::now();
        let result = self.chat.complete(&request).await;
        observe(Service::Chat, request.purpose.as_str(), started, &result);
        result
    }

    pub(crate) async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SageError> {
        let started = Instant::now();
        let result = self.search.search(query, max_results).await;
        observe(Service::WebSearch, "search", started, &result);
        result
    }

    pub(crate) async fn lookup(
        &self,
        query: &str,
        max_docs: usize,
    ) -> Result<Vec<EncyclopediaEntry>, SageError> {
        let started = Instant::now();
        let result = self.encyclopedia.lookup(query, max_docs).await;
        observe(Service::Encyclopedia, "lookup", started, &result);
        result
    }
}

fn observe<T>(service: Service, purpose: &str, started: Instant, result: &Result<T, SageError>) {
    let duration_ms = started.elapsed().as_millis() as u64;
    record_external_call(service, purpose, result.is_ok(), duration_ms);
    match result {
        Ok(_) => debug!(%service, purpose, duration_ms, "external call completed"),
        Err(err) => warn!(%service, purpose, duration_ms, error = %err, "external call failed"),
    }
}
