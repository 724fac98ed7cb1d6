use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sage_core::{
    ANALYST_COUNT, ChatModel, ChatRequest, ChatRole, Encyclopedia, EncyclopediaEntry, Purpose,
    SageError, SearchHit, Service, Services, SessionOptions, StubChat, StubEncyclopedia,
    StubSearch, WebSearch, WorkflowSettings, run_report_session, run_report_session_with_options,
};
use tempfile::tempdir;

/// Behaves like the stub model until `fail_after` calls were made, then errors.
struct FlakyChat {
    inner: StubChat,
    fail_after: usize,
    calls: AtomicUsize,
}

impl FlakyChat {
    fn new(fail_after: usize) -> Self {
        Self {
            inner: StubChat::new(),
            fail_after,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChatModel for FlakyChat {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, SageError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
            return Err(SageError::upstream(Service::Chat, "503 service unavailable"));
        }
        self.inner.complete(request).await
    }
}

struct DownSearch;

#[async_trait]
impl WebSearch for DownSearch {
    fn name(&self) -> &str {
        "down"
    }

    async fn search(
        &self,
        _query: &str,
        _max_results: usize,
    ) -> Result<Vec<SearchHit>, SageError> {
        Err(SageError::upstream(Service::WebSearch, "quota exceeded"))
    }
}

struct DownEncyclopedia;

#[async_trait]
impl Encyclopedia for DownEncyclopedia {
    fn name(&self) -> &str {
        "down"
    }

    async fn lookup(
        &self,
        _query: &str,
        _max_docs: usize,
    ) -> Result<Vec<EncyclopediaEntry>, SageError> {
        Err(SageError::malformed(Service::Encyclopedia, "unexpected payload"))
    }
}

/// Two analysts share a name; each question and section echoes who asked it.
struct SameNameChat {
    inner: StubChat,
}

#[async_trait]
impl ChatModel for SameNameChat {
    fn name(&self) -> &str {
        "same-name"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, SageError> {
        match request.purpose {
            Purpose::Personas => Ok(r#"[
                {"name": "Ada", "role": "Engineer"},
                {"name": "Ada", "role": "Economist"},
                {"name": "Cy", "role": "Lawyer"}
            ]"#
            .to_string()),
            Purpose::Question => {
                let system = request
                    .messages
                    .iter()
                    .find(|msg| msg.role == ChatRole::System)
                    .map(|msg| msg.content.lines().next().unwrap_or_default().to_string())
                    .unwrap_or_default();
                Ok(format!("{system} What matters most to you?"))
            }
            Purpose::Section => Ok(request
                .messages
                .last()
                .map(|msg| msg.content.clone())
                .unwrap_or_default()),
            _ => self.inner.complete(request).await,
        }
    }
}

fn services_with_chat(chat: Arc<dyn ChatModel>) -> Services {
    Services::new(
        chat,
        Arc::new(StubSearch::new()),
        Arc::new(StubEncyclopedia::new()),
    )
}

#[tokio::test]
async fn offline_session_produces_full_report() {
    let outcome = run_report_session_with_options(SessionOptions::new(
        "  Solid-state batteries  ",
        Services::offline(),
    ))
    .await
    .expect("session succeeds");

    let state = &outcome.state;
    assert_eq!(state.topic, "Solid-state batteries");
    assert_eq!(state.analysts.len(), ANALYST_COUNT);
    assert_eq!(state.interviews.len(), ANALYST_COUNT);
    assert_eq!(state.sections.len(), ANALYST_COUNT);
    assert!(state.interviews.iter().all(|interview| interview.turns.len() == 2));

    let report = &outcome.report;
    assert!(report.starts_with("# Solid-state batteries"));

    let intro = report.find("## Introduction").expect("introduction heading");
    let mut cursor = intro;
    for persona in &state.analysts {
        let at = report.find(&persona.heading()).expect("section heading");
        assert!(at > cursor, "sections follow analyst order");
        cursor = at;
    }
    let conclusion = report.find("## Conclusion").expect("conclusion heading");
    assert!(conclusion > cursor);
    assert!(report.contains("## References"));
    assert!(report.contains("https://search.invalid/"));
}

#[tokio::test]
async fn session_records_trace_for_every_task() {
    let dir = tempdir().unwrap();
    let outcome = run_report_session_with_options(
        SessionOptions::new("Urban heat islands", Services::offline())
            .with_session_id("trace-session")
            .with_trace_output_dir(dir.path()),
    )
    .await
    .unwrap();

    let tasks: Vec<&str> = outcome
        .trace_events
        .iter()
        .map(|event| event.task_id.as_str())
        .collect();
    assert_eq!(
        tasks,
        vec![
            "create_analysts",
            "conduct_interviews",
            "write_sections",
            "write_intro_conclusion",
            "finalize_report",
        ]
    );

    assert_eq!(outcome.session_id, "trace-session");
    let path = outcome.trace_path.as_ref().expect("trace persisted");
    assert!(path.starts_with(dir.path()));
    assert!(path.exists());

    let markdown = outcome.explain_markdown().unwrap();
    assert!(markdown.contains("1. create_analysts"));
    assert!(outcome.explain_mermaid().unwrap().starts_with("flowchart TD"));
    assert!(outcome.explain_graphviz().unwrap().starts_with("digraph Trace"));
}

#[tokio::test]
async fn interviews_stop_at_closing_remark() {
    let chat = Arc::new(StubChat::new().with_closing_after(1));
    let services = services_with_chat(chat.clone());

    let outcome = run_report_session_with_options(
        SessionOptions::new("Coral reef restoration", services)
            .with_settings(WorkflowSettings::default().with_max_turns(5)),
    )
    .await
    .unwrap();

    assert!(
        outcome
            .state
            .interviews
            .iter()
            .all(|interview| interview.turns.len() == 1)
    );
    // personas + 3 x (question, query, answer, closing question) + 3 sections + intro + conclusion
    assert_eq!(chat.call_count(), 1 + 3 * 4 + 3 + 2);
}

#[tokio::test]
async fn turn_count_never_exceeds_max_turns() {
    let chat = Arc::new(StubChat::new());
    let services = services_with_chat(chat.clone());

    let outcome = run_report_session_with_options(
        SessionOptions::new("Quantum error correction", services)
            .with_settings(WorkflowSettings::default().with_max_turns(3)),
    )
    .await
    .unwrap();

    for interview in &outcome.state.interviews {
        assert_eq!(interview.turns.len(), 3);
    }
    assert_eq!(chat.call_count(), 1 + 3 * 3 * 3 + 3 + 2);
}

#[tokio::test]
async fn parallel_interviews_keep_analyst_order() {
    let outcome = run_report_session_with_options(
        SessionOptions::new("Carbon capture", Services::offline())
            .with_settings(WorkflowSettings::default().with_parallel_interviews(true)),
    )
    .await
    .unwrap();

    let state = &outcome.state;
    let analyst_names: Vec<&str> = state.analysts.iter().map(|p| p.name.as_str()).collect();
    let interview_names: Vec<&str> = state
        .interviews
        .iter()
        .map(|interview| interview.persona.name.as_str())
        .collect();
    assert_eq!(analyst_names, interview_names);

    let headings: Vec<String> = state.analysts.iter().map(|p| p.heading()).collect();
    let section_headings: Vec<String> = state.sections.iter().map(|s| s.heading.clone()).collect();
    assert_eq!(headings, section_headings);
}

#[tokio::test]
async fn shared_sources_are_listed_once() {
    let encyclopedia = StubEncyclopedia::new();
    encyclopedia.insert(EncyclopediaEntry {
        title: "Recent developments".into(),
        url: "https://en.wikipedia.org/wiki/Recent_developments".into(),
        excerpt: "An overview of recent developments.".into(),
    });
    let services = Services::new(
        Arc::new(StubChat::new()),
        Arc::new(StubSearch::new()),
        Arc::new(encyclopedia),
    );

    let report = run_report_session("Fusion energy", services).await.unwrap();

    let url = "https://en.wikipedia.org/wiki/Recent_developments";
    let references = report
        .split("## References")
        .nth(1)
        .expect("references block");
    assert_eq!(references.matches(url).count(), 1);
}

#[tokio::test]
async fn upstream_failure_aborts_without_report() {
    // Fails partway through the first interview.
    let services = services_with_chat(Arc::new(FlakyChat::new(3)));

    let err = run_report_session_with_options(SessionOptions::new("Desalination", services))
        .await
        .expect_err("session must fail");

    let cause = err
        .downcast_ref::<SageError>()
        .expect("typed failure preserved");
    assert!(cause.is_upstream());
    assert!(matches!(
        cause,
        SageError::Upstream {
            service: Service::Chat,
            ..
        }
    ));
}

#[tokio::test]
async fn failure_during_framing_is_reported() {
    // personas + 18 interview calls + 3 sections succeed; the introduction fails.
    let services = services_with_chat(Arc::new(FlakyChat::new(1 + 18 + 3)));

    let err = run_report_session("Desalination", services)
        .await
        .expect_err("session must fail");
    assert!(
        err.downcast_ref::<SageError>()
            .is_some_and(SageError::is_upstream)
    );
}

#[tokio::test]
async fn blank_topic_is_rejected_before_any_call() {
    let chat = Arc::new(StubChat::new());
    let services = services_with_chat(chat.clone());

    let err = run_report_session("   ", services).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SageError>(),
        Some(SageError::EmptyTopic)
    ));
    assert_eq!(chat.call_count(), 0);
}

#[tokio::test]
async fn duplicate_analyst_names_keep_their_own_sections() {
    let services = services_with_chat(Arc::new(SameNameChat {
        inner: StubChat::new(),
    }));

    let outcome = run_report_session_with_options(
        SessionOptions::new("Grid storage", services)
            .with_settings(WorkflowSettings::default().with_max_turns(1)),
    )
    .await
    .unwrap();

    let sections = &outcome.state.sections;
    assert_eq!(sections[0].heading, "## Ada, Engineer");
    assert!(sections[0].body.contains("Engineer at"));
    assert_eq!(sections[1].heading, "## Ada, Economist");
    assert!(sections[1].body.contains("Economist at"));
    assert!(!sections[1].body.contains("Engineer at"));
}

#[tokio::test]
async fn web_search_failure_aborts_session() {
    let chat = Arc::new(StubChat::new());
    let services = Services::new(
        chat.clone(),
        Arc::new(DownSearch),
        Arc::new(StubEncyclopedia::new()),
    );

    let err = run_report_session("Geothermal heating", services)
        .await
        .expect_err("session must fail");

    assert!(matches!(
        err.downcast_ref::<SageError>(),
        Some(SageError::Upstream {
            service: Service::WebSearch,
            ..
        })
    ));
    // personas, then the first question and its search query
    assert_eq!(chat.call_count(), 3);
}

#[tokio::test]
async fn encyclopedia_failure_aborts_session() {
    let services = Services::new(
        Arc::new(StubChat::new()),
        Arc::new(StubSearch::new()),
        Arc::new(DownEncyclopedia),
    );

    let err = run_report_session("Geothermal heating", services)
        .await
        .expect_err("session must fail");

    let cause = err.downcast_ref::<SageError>().expect("typed failure");
    assert!(cause.is_upstream());
    assert!(matches!(
        cause,
        SageError::MalformedResponse {
            service: Service::Encyclopedia,
            ..
        }
    ));
}

#[tokio::test]
async fn parallel_interviews_fail_fast() {
    let chat = Arc::new(StubChat::new());
    let services = Services::new(
        chat.clone(),
        Arc::new(DownSearch),
        Arc::new(StubEncyclopedia::new()),
    );

    let err = run_report_session_with_options(
        SessionOptions::new("Geothermal heating", services)
            .with_settings(WorkflowSettings::default().with_parallel_interviews(true)),
    )
    .await
    .expect_err("session must fail");

    assert!(matches!(
        err.downcast_ref::<SageError>(),
        Some(SageError::Upstream {
            service: Service::WebSearch,
            ..
        })
    ));
    // No interview got past its first search; no section or framing call was made.
    assert!(chat.call_count() <= 1 + ANALYST_COUNT * 2);
}

#[tokio::test]
async fn unsafe_session_id_is_rejected_before_any_call() {
    let dir = tempdir().unwrap();
    let traces = dir.path().join("data").join("traces");
    let chat = Arc::new(StubChat::new());
    let services = services_with_chat(chat.clone());

    let err = run_report_session_with_options(
        SessionOptions::new("Wave power", services)
            .with_session_id("../../escaped")
            .with_trace_output_dir(&traces),
    )
    .await
    .expect_err("session id must be rejected");

    assert!(matches!(
        err.downcast_ref::<SageError>(),
        Some(SageError::InvalidSessionId(_))
    ));
    assert_eq!(chat.call_count(), 0);
    assert!(!dir.path().join("escaped.json").exists());
}
