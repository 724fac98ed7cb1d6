//! SAGE core: topic research reports built on top of `graph_flow`.
//!
//! A session generates three analyst personas, interviews each one against web
//! search and encyclopedia sources, writes one section per interview, frames the
//! sections with an introduction and a conclusion, and assembles a Markdown report.

mod config;
mod encyclopedia;
mod error;
mod llm;
mod metrics;
mod prompts;
mod search;
mod security;
mod services;
mod state;
pub mod steps;
mod tasks;
mod telemetry;
mod trace;
mod workflow;

pub use config::{
    Config, ConfigLoader, EncyclopediaConfig, InterviewConfig, LlmConfig, LoggingConfig,
    STUB_PROVIDER, SearchConfig, WorkflowConfig,
};
pub use encyclopedia::{
    DynEncyclopedia, Encyclopedia, EncyclopediaEntry, StubEncyclopedia, WikipediaClient,
};
pub use error::{SageError, Service};
pub use llm::{
    ChatMessage, ChatModel, ChatRequest, ChatRole, DynChatModel, OpenAiCompatibleChat, Purpose,
    StubChat,
};
pub use metrics::{init_metrics_from_env, record_external_call, record_report_outcome};
pub use search::{DynWebSearch, SearchHit, StubSearch, TavilySearch, WebSearch};
pub use security::{SecretValue, require_env};
pub use services::Services;
pub use state::{
    ANALYST_COUNT, Interview, Persona, Reference, ReferenceOrigin, ReportState, Section, Turn,
};
pub use steps::WorkflowSettings;
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceEvent, TraceStep, TraceSummary, persist_trace};
pub use workflow::{
    SessionOptions, SessionOutcome, run_report_session, run_report_session_with_options,
    validate_session_id,
};
