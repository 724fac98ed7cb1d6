use futures::future::try_join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument};

use super::WorkflowSettings;
use crate::encyclopedia::EncyclopediaEntry;
use crate::error::SageError;
use crate::llm::{ChatRequest, Purpose};
use crate::prompts;
use crate::search::SearchHit;
use crate::services::Services;
use crate::state::{Interview, Persona, Reference, ReferenceOrigin, ReportState, Turn};

static SIGN_OFF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(thank you so much for your help|that'?s all for now|no further questions)")
        .expect("invalid sign-off regex")
});

static THANKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(thank you|thanks)\b").expect("invalid thanks regex"));

/// Best-effort detection of an interviewer ending the conversation.
///
/// An explicit sign-off phrase always ends it; a plain "thanks" only when the text
/// asks nothing further. Blank output ends it too.
pub fn is_closing_remark(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return true;
    }
    SIGN_OFF.is_match(text) || (THANKS.is_match(text) && !text.contains('?'))
}

/// Run one persona's interview: question, search, answer, up to `max_turns` times.
#[instrument(name = "interview", skip_all, fields(analyst = %persona.name))]
pub async fn conduct_interview(
    services: &Services,
    settings: &WorkflowSettings,
    topic: &str,
    persona: Persona,
) -> Result<Interview, SageError> {
    let system = prompts::interviewer(topic, &persona);
    let mut interview = Interview::new(persona);

    for turn_index in 0..settings.max_turns.max(1) {
        let mut request = ChatRequest::new(Purpose::Question).system(system.as_str());
        for turn in &interview.turns {
            request = request
                .assistant(turn.question.as_str())
                .user(turn.answer.as_str());
        }
        let question = services.ask(request.user(prompts::NEXT_QUESTION)).await?;

        if is_closing_remark(&question) {
            debug!(turn = turn_index, "interviewer closed the conversation");
            break;
        }

        let raw_query = services
            .ask(
                ChatRequest::new(Purpose::SearchQuery)
                    .system(prompts::SEARCH_QUERY)
                    .user(question.as_str()),
            )
            .await?;
        let search_query = clean_search_query(&raw_query, &question);

        let (hits, entries) = tokio::try_join!(
            services.search(&search_query, settings.max_search_results),
            services.lookup(&search_query, settings.max_encyclopedia_docs),
        )?;

        let context = render_context(&hits, &entries);
        let answer = services
            .ask(
                ChatRequest::new(Purpose::Answer)
                    .system(prompts::expert(topic, &context))
                    .user(question.as_str()),
            )
            .await?;

        debug!(
            turn = turn_index,
            %search_query,
            web_hits = hits.len(),
            encyclopedia_hits = entries.len(),
            "interview turn recorded"
        );

        interview.turns.push(Turn {
            question,
            answer,
            search_query,
            references: collect_references(&hits, &entries),
        });
    }

    info!(turns = interview.turns.len(), "interview finished");
    Ok(interview)
}

/// Interview every analyst. Results keep analyst order; the first failure aborts the batch.
pub async fn conduct_interviews(
    services: &Services,
    settings: &WorkflowSettings,
    state: ReportState,
) -> Result<ReportState, SageError> {
    state.ensure_analysts()?;

    let interviews = if settings.parallel_interviews {
        try_join_all(
            state
                .analysts
                .iter()
                .cloned()
                .map(|persona| conduct_interview(services, settings, &state.topic, persona)),
        )
        .await?
    } else {
        let mut interviews = Vec::with_capacity(state.analysts.len());
        for persona in state.analysts.iter().cloned() {
            interviews.push(conduct_interview(services, settings, &state.topic, persona).await?);
        }
        interviews
    };

    Ok(state.with_interviews(interviews))
}

fn clean_search_query(raw: &str, question: &str) -> String {
    let line = raw
        .lines()
        .map(|line| line.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`'))
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let line = line
        .strip_prefix("Search query:")
        .or_else(|| line.strip_prefix("Query:"))
        .unwrap_or(line)
        .trim();

    if line.is_empty() {
        question.trim().to_string()
    } else {
        line.to_string()
    }
}

fn render_context(hits: &[SearchHit], entries: &[EncyclopediaEntry]) -> String {
    let web = hits
        .iter()
        .filter(|hit| !hit.snippet.is_empty())
        .map(|hit| format!("[{}]({})\n{}", hit.title, hit.url, hit.snippet));
    let encyclopedia = entries
        .iter()
        .map(|entry| format!("[{}]({})\n{}", entry.title, entry.url, entry.excerpt));

    let context = web.chain(encyclopedia).collect::<Vec<_>>().join("\n\n---\n\n");
    if context.is_empty() {
        "No search results were found.".to_string()
    } else {
        context
    }
}

fn collect_references(hits: &[SearchHit], entries: &[EncyclopediaEntry]) -> Vec<Reference> {
    let web = hits.iter().map(|hit| Reference {
        title: hit.title.clone(),
        url: hit.url.clone(),
        origin: ReferenceOrigin::Web,
    });
    let encyclopedia = entries.iter().map(|entry| Reference {
        title: entry.title.clone(),
        url: entry.url.clone(),
        origin: ReferenceOrigin::Encyclopedia,
    });
    web.chain(encyclopedia)
        .filter(|reference| !reference.url.is_empty())
        .collect()
}
