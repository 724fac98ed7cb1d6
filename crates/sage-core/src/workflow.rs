use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use graph_flow::{
    ExecutionStatus, FlowRunner, GraphBuilder, InMemorySessionStorage, Session, SessionStorage,
    Task,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SageError;
use crate::metrics;
use crate::services::Services;
use crate::state::ReportState;
use crate::steps::WorkflowSettings;
use crate::tasks::{
    FailureSlot, FinalizeTask, FramingTask, InterviewTask, PersonaTask, STATE_KEY, SectionTask,
};
use crate::trace::{TRACE_EVENTS_KEY, TraceEvent, TraceSummary, persist_trace};

/// The tasks wired into the report graph, in execution order.
struct ReportTasks {
    personas: Arc<PersonaTask>,
    interviews: Arc<InterviewTask>,
    sections: Arc<SectionTask>,
    framing: Arc<FramingTask>,
    finalize: Arc<FinalizeTask>,
}

impl ReportTasks {
    fn new(services: &Services, settings: &WorkflowSettings, failures: &FailureSlot) -> Self {
        Self {
            personas: Arc::new(PersonaTask::new(services.clone(), failures.clone())),
            interviews: Arc::new(InterviewTask::new(
                services.clone(),
                settings.clone(),
                failures.clone(),
            )),
            sections: Arc::new(SectionTask::new(services.clone(), failures.clone())),
            framing: Arc::new(FramingTask::new(services.clone(), failures.clone())),
            finalize: Arc::new(FinalizeTask::new(failures.clone())),
        }
    }
}

fn build_graph(
    services: &Services,
    settings: &WorkflowSettings,
    failures: &FailureSlot,
) -> (Arc<graph_flow::Graph>, ReportTasks) {
    let tasks = ReportTasks::new(services, settings, failures);

    let graph = GraphBuilder::new("sage_report_workflow")
        .add_task(tasks.personas.clone())
        .add_task(tasks.interviews.clone())
        .add_task(tasks.sections.clone())
        .add_task(tasks.framing.clone())
        .add_task(tasks.finalize.clone())
        .add_edge(tasks.personas.id(), tasks.interviews.id())
        .add_edge(tasks.interviews.id(), tasks.sections.id())
        .add_edge(tasks.sections.id(), tasks.framing.id())
        .add_edge(tasks.framing.id(), tasks.finalize.id())
        .set_start_task(tasks.personas.id())
        .build();

    (Arc::new(graph), tasks)
}

fn new_session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}

const MAX_SESSION_ID_LEN: usize = 128;

/// Session IDs name trace files, so only plain file-name characters are accepted.
pub fn validate_session_id(session_id: &str) -> Result<(), SageError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SageError::InvalidSessionId(session_id.to_string()))
    }
}

/// Options for running a report session.
pub struct SessionOptions<'a> {
    pub topic: &'a str,
    pub services: Services,
    pub settings: WorkflowSettings,
    pub session_id: Option<String>,
    pub trace_output_dir: Option<PathBuf>,
}

impl<'a> SessionOptions<'a> {
    pub fn new(topic: &'a str, services: Services) -> Self {
        Self {
            topic,
            services,
            settings: WorkflowSettings::default(),
            session_id: None,
            trace_output_dir: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_trace_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_output_dir = Some(dir.into());
        self
    }
}

/// Everything a finished session produced.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: String,
    pub state: ReportState,
    pub report: String,
    pub trace_events: Vec<TraceEvent>,
    pub trace_summary: TraceSummary,
    pub trace_path: Option<PathBuf>,
}

impl SessionOutcome {
    pub fn explain_markdown(&self) -> Option<String> {
        self.explain_with(TraceSummary::render_markdown)
    }

    pub fn explain_mermaid(&self) -> Option<String> {
        self.explain_with(TraceSummary::render_mermaid)
    }

    pub fn explain_graphviz(&self) -> Option<String> {
        self.explain_with(TraceSummary::render_graphviz)
    }

    fn explain_with(&self, render: fn(&TraceSummary) -> String) -> Option<String> {
        if self.trace_summary.steps.is_empty() {
            None
        } else {
            Some(render(&self.trace_summary))
        }
    }
}

/// Run the report workflow end-to-end for `topic` and return the Markdown report.
pub async fn run_report_session(topic: &str, services: Services) -> Result<String> {
    run_report_session_with_options(SessionOptions::new(topic, services))
        .await
        .map(|outcome| outcome.report)
}

/// Run the report workflow with custom settings, session ID and trace output.
///
/// Failures raised by a step surface as [`SageError`](crate::SageError) inside the
/// returned `anyhow::Error`, so callers can `downcast_ref` to classify them. No
/// partial report is ever returned.
pub async fn run_report_session_with_options(options: SessionOptions<'_>) -> Result<SessionOutcome> {
    let initial = ReportState::new(options.topic)?;
    if let Some(session_id) = options.session_id.as_deref() {
        validate_session_id(session_id)?;
    }

    let failures = FailureSlot::default();
    let (graph, tasks) = build_graph(&options.services, &options.settings, &failures);

    let storage = Arc::new(InMemorySessionStorage::new());
    let runner = FlowRunner::new(graph, storage.clone());

    let session_id = options.session_id.clone().unwrap_or_else(new_session_id);
    let session = Session::new_from_task(session_id.clone(), tasks.personas.id());
    session.context.set(STATE_KEY, &initial).await;

    storage
        .save(session)
        .await
        .map_err(|err| anyhow!("failed to persist session: {err}"))?;

    info!(session = %session_id, topic = %initial.topic, "report session started");

    loop {
        let result = match runner.run(&session_id).await {
            Ok(result) => result,
            Err(err) => {
                metrics::record_report_outcome(false);
                warn!(session = %session_id, error = %err, "report session failed");
                return Err(match failures.take() {
                    Some(cause) => cause.into(),
                    None => anyhow!("graph execution failure: {err}"),
                });
            }
        };

        match result.status {
            ExecutionStatus::Completed => break,
            ExecutionStatus::WaitingForInput => continue,
            ExecutionStatus::Error(message) => {
                metrics::record_report_outcome(false);
                return Err(match failures.take() {
                    Some(cause) => cause.into(),
                    None => anyhow!(message),
                });
            }
        }
    }

    let session = storage
        .get(&session_id)
        .await
        .map_err(|err| anyhow!("failed to reload session: {err}"))?
        .ok_or_else(|| anyhow!("session missing after execution"))?;

    let state: ReportState = session
        .context
        .get(STATE_KEY)
        .await
        .ok_or_else(|| anyhow!("report state missing after execution"))?;

    if !state.is_complete() {
        metrics::record_report_outcome(false);
        return Err(anyhow!("workflow finished without assembling a report"));
    }

    let trace_events: Vec<TraceEvent> = session
        .context
        .get(TRACE_EVENTS_KEY)
        .await
        .unwrap_or_default();
    let trace_summary = TraceSummary::from_events(&trace_events);

    let trace_path = match options.trace_output_dir.as_ref() {
        Some(dir) => Some(persist_trace(dir, &session_id, &trace_events)?),
        None => None,
    };

    metrics::record_report_outcome(true);
    info!(
        session = %session_id,
        sections = state.sections.len(),
        chars = state.final_report.len(),
        "report session completed"
    );

    Ok(SessionOutcome {
        session_id,
        report: state.final_report.clone(),
        state,
        trace_events,
        trace_summary,
        trace_path,
    })
}
