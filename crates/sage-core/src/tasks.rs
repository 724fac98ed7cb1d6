//! `graph_flow` tasks. Each one loads the [`ReportState`] snapshot from the session
//! context, runs exactly one step, and stores the next snapshot.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Task, TaskResult};
use tracing::{info, instrument};

use crate::error::SageError;
use crate::services::Services;
use crate::state::ReportState;
use crate::steps::{self, WorkflowSettings};
use crate::trace::{TRACE_EVENTS_KEY, TraceEvent};

/// Context key holding the serialised report state.
pub(crate) const STATE_KEY: &str = "report.state";

async fn load_state(context: &Context, task_id: &str) -> graph_flow::Result<ReportState> {
    context.get::<ReportState>(STATE_KEY).await.ok_or_else(|| {
        GraphError::TaskExecutionFailed(format!("{task_id}: report state missing from context"))
    })
}

async fn store_state(context: &Context, task_id: &str, state: &ReportState, message: &str) {
    context.set(STATE_KEY, state).await;

    let mut events: Vec<TraceEvent> = context.get(TRACE_EVENTS_KEY).await.unwrap_or_default();
    events.push(TraceEvent::new(task_id, message));
    context.set(TRACE_EVENTS_KEY, &events).await;
}

/// Keeps the first typed failure raised by a task. `graph_flow` only carries the
/// rendered message, so the session runner reads the typed error back from here.
#[derive(Clone, Default)]
pub(crate) struct FailureSlot(Arc<Mutex<Option<SageError>>>);

impl FailureSlot {
    fn record(&self, task_id: &str, err: SageError) -> GraphError {
        let message = format!("{task_id}: {err}");
        if let Ok(mut slot) = self.0.lock() {
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        GraphError::TaskExecutionFailed(message)
    }

    pub(crate) fn take(&self) -> Option<SageError> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

pub struct PersonaTask {
    services: Services,
    failures: FailureSlot,
}

impl PersonaTask {
    pub(crate) fn new(services: Services, failures: FailureSlot) -> Self {
        Self { services, failures }
    }
}

#[async_trait]
impl Task for PersonaTask {
    fn id(&self) -> &str {
        "create_analysts"
    }

    #[instrument(name = "task.create_analysts", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let state = load_state(&context, self.id()).await?;
        let state = steps::generate_personas(&self.services, state)
            .await
            .map_err(|err| self.failures.record(self.id(), err))?;

        let names = state
            .analysts
            .iter()
            .map(|persona| persona.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let message = format!("{} analysts: {names}", state.analysts.len());
        store_state(&context, self.id(), &state, &message).await;

        Ok(TaskResult::new(Some(message), NextAction::ContinueAndExecute))
    }
}

pub struct InterviewTask {
    services: Services,
    settings: WorkflowSettings,
    failures: FailureSlot,
}

impl InterviewTask {
    pub(crate) fn new(
        services: Services,
        settings: WorkflowSettings,
        failures: FailureSlot,
    ) -> Self {
        Self {
            services,
            settings,
            failures,
        }
    }
}

#[async_trait]
impl Task for InterviewTask {
    fn id(&self) -> &str {
        "conduct_interviews"
    }

    #[instrument(name = "task.conduct_interviews", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let state = load_state(&context, self.id()).await?;

        info!(
            analysts = state.analysts.len(),
            max_turns = self.settings.max_turns,
            parallel = self.settings.parallel_interviews,
            "starting interviews"
        );

        let state = steps::conduct_interviews(&self.services, &self.settings, state)
            .await
            .map_err(|err| self.failures.record(self.id(), err))?;

        let turns: Vec<String> = state
            .interviews
            .iter()
            .map(|interview| format!("{}={}", interview.persona.name, interview.turns.len()))
            .collect();
        let message = format!("interview turns: {}", turns.join(", "));
        store_state(&context, self.id(), &state, &message).await;

        Ok(TaskResult::new(Some(message), NextAction::ContinueAndExecute))
    }
}

pub struct SectionTask {
    services: Services,
    failures: FailureSlot,
}

impl SectionTask {
    pub(crate) fn new(services: Services, failures: FailureSlot) -> Self {
        Self { services, failures }
    }
}

#[async_trait]
impl Task for SectionTask {
    fn id(&self) -> &str {
        "write_sections"
    }

    #[instrument(name = "task.write_sections", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let state = load_state(&context, self.id()).await?;
        let state = steps::write_sections(&self.services, state)
            .await
            .map_err(|err| self.failures.record(self.id(), err))?;

        let message = format!("{} sections written", state.sections.len());
        store_state(&context, self.id(), &state, &message).await;

        Ok(TaskResult::new(Some(message), NextAction::ContinueAndExecute))
    }
}

pub struct FramingTask {
    services: Services,
    failures: FailureSlot,
}

impl FramingTask {
    pub(crate) fn new(services: Services, failures: FailureSlot) -> Self {
        Self { services, failures }
    }
}

#[async_trait]
impl Task for FramingTask {
    fn id(&self) -> &str {
        "write_intro_conclusion"
    }

    #[instrument(name = "task.write_intro_conclusion", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let state = load_state(&context, self.id()).await?;
        let state = steps::write_framing(&self.services, state)
            .await
            .map_err(|err| self.failures.record(self.id(), err))?;

        let message = "introduction and conclusion written".to_string();
        store_state(&context, self.id(), &state, &message).await;

        Ok(TaskResult::new(Some(message), NextAction::ContinueAndExecute))
    }
}

pub struct FinalizeTask {
    failures: FailureSlot,
}

impl FinalizeTask {
    pub(crate) fn new(failures: FailureSlot) -> Self {
        Self { failures }
    }
}

#[async_trait]
impl Task for FinalizeTask {
    fn id(&self) -> &str {
        "finalize_report"
    }

    #[instrument(name = "task.finalize_report", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let state = load_state(&context, self.id()).await?;
        let state =
            steps::finalize_report(state).map_err(|err| self.failures.record(self.id(), err))?;

        let message = format!("report assembled ({} chars)", state.final_report.len());
        store_state(&context, self.id(), &state, &message).await;

        info!(chars = state.final_report.len(), "finalize task completed");

        Ok(TaskResult::new(Some(state.final_report), NextAction::End))
    }
}
