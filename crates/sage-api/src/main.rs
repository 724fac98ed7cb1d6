use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use sage_core::{
    ConfigLoader, Persona, SageError, Services, SessionOptions, SessionOutcome, TelemetryOptions,
    TraceEvent, WorkflowSettings, init_metrics_from_env, init_telemetry,
    run_report_session_with_options, validate_session_id,
};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    signal,
    sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError},
};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    services: Services,
    settings: WorkflowSettings,
    trace_dir: PathBuf,
    session_permits: Arc<Semaphore>,
    max_sessions: usize,
}

impl AppState {
    fn new(
        services: Services,
        settings: WorkflowSettings,
        trace_dir: PathBuf,
        max_sessions: usize,
    ) -> Self {
        Self {
            services,
            settings,
            trace_dir,
            session_permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::load(None)?;
    init_telemetry(TelemetryOptions::from_level(&config.logging.level))?;
    init_metrics_from_env("sage-api");

    let addr: SocketAddr = std::env::var("SAGE_API_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .context("invalid SAGE_API_ADDR")?;

    let trace_dir = std::env::var("SAGE_TRACE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/traces"));

    let session_limit = std::env::var("SAGE_MAX_CONCURRENT_SESSIONS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(4);

    let state = AppState::new(
        Services::from_config(&config)?,
        WorkflowSettings::from_config(&config),
        trace_dir,
        session_limit,
    );

    let app = build_router(state);

    info!(offline = config.is_offline(), "SAGE API listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/reports", post(handle_report))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
enum ExplainFormat {
    #[default]
    Markdown,
    Mermaid,
    Graphviz,
}

impl ExplainFormat {
    fn render(self, outcome: &SessionOutcome) -> Option<String> {
        match self {
            ExplainFormat::Markdown => outcome.explain_markdown(),
            ExplainFormat::Mermaid => outcome.explain_mermaid(),
            ExplainFormat::Graphviz => outcome.explain_graphviz(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            ExplainFormat::Markdown => "markdown",
            ExplainFormat::Mermaid => "mermaid",
            ExplainFormat::Graphviz => "graphviz",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Map a failed session onto a status code: bad input, upstream trouble, or ours.
    fn from_session(error: anyhow::Error) -> Self {
        let status = match error.downcast_ref::<SageError>() {
            Some(SageError::EmptyTopic | SageError::InvalidSessionId(_)) => {
                StatusCode::BAD_REQUEST
            }
            Some(err) if err.is_upstream() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, error.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

fn acquire_session_permit(state: &AppState) -> ApiResult<OwnedSemaphorePermit> {
    match state.session_permits.clone().try_acquire_owned() {
        Ok(permit) => Ok(permit),
        Err(TryAcquireError::NoPermits) => Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "session capacity reached; retry once a slot frees up",
        )),
        Err(TryAcquireError::Closed) => Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "session executor unavailable",
        )),
    }
}

#[derive(Debug, Deserialize)]
struct ReportRequest {
    topic: String,
    session_id: Option<String>,
    explain: Option<bool>,
    explain_format: Option<ExplainFormat>,
    persist_trace: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ReportPayload {
    session_id: String,
    report: String,
    analysts: Vec<Persona>,
    trace_path: Option<String>,
    explanation: Option<String>,
    explanation_format: Option<String>,
    trace_events: Vec<TraceEvent>,
}

#[derive(Debug, Serialize)]
struct CapacityReport {
    max_sessions: usize,
    available_sessions: usize,
    active_sessions: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    capacity: CapacityReport,
    providers: ProviderReport,
}

#[derive(Debug, Serialize)]
struct ProviderReport {
    chat: String,
    search: String,
    encyclopedia: String,
}

fn capacity_report(state: &AppState) -> CapacityReport {
    let available = state.session_permits.available_permits();
    CapacityReport {
        max_sessions: state.max_sessions,
        available_sessions: available,
        active_sessions: state.max_sessions.saturating_sub(available),
    }
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        capacity: capacity_report(&state),
        providers: ProviderReport {
            chat: state.services.chat.name().to_string(),
            search: state.services.search.name().to_string(),
            encyclopedia: state.services.encyclopedia.name().to_string(),
        },
    })
}

async fn handle_report(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> ApiResult<Json<ReportPayload>> {
    if request.topic.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            SageError::EmptyTopic.to_string(),
        ));
    }

    if let Some(session_id) = request.session_id.as_deref() {
        validate_session_id(session_id)
            .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?;
    }

    let _permit = acquire_session_permit(&state)?;

    let session_id = request
        .session_id
        .unwrap_or_else(|| format!("session-{}", Uuid::new_v4()));
    let mut options = SessionOptions::new(&request.topic, state.services.clone())
        .with_settings(state.settings.clone())
        .with_session_id(session_id.clone());

    let explain = request.explain.unwrap_or(false);
    if request.persist_trace.unwrap_or(false) {
        options = options.with_trace_output_dir(state.trace_dir.clone());
    }

    let outcome = run_report_session_with_options(options)
        .await
        .map_err(|err| {
            warn!(session = %session_id, error = %err, "report request failed");
            AppError::from_session(err)
        })?;

    let explain_format = request.explain_format.unwrap_or_default();
    let (explanation, explanation_format) = if explain {
        match explain_format.render(&outcome) {
            Some(text) => (Some(text), Some(explain_format.label().to_string())),
            None => (None, None),
        }
    } else {
        (None, None)
    };

    Ok(Json(ReportPayload {
        session_id: outcome.session_id,
        report: outcome.report,
        analysts: outcome.state.analysts,
        trace_path: outcome
            .trace_path
            .as_ref()
            .map(|path| path.display().to_string()),
        explanation,
        explanation_format,
        trace_events: outcome.trace_events,
    }))
}
