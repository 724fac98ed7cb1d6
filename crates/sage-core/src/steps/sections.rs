use tracing::{debug, info};

use crate::error::SageError;
use crate::llm::{ChatRequest, Purpose};
use crate::prompts;
use crate::services::Services;
use crate::state::{ReportState, Section};

const EMPTY_INTERVIEW_NOTE: &str = "The interviewer closed the conversation before asking a question, so no findings were recorded for this perspective.";

/// Condense each analyst's transcript into one report section, in analyst order.
pub async fn write_sections(
    services: &Services,
    state: ReportState,
) -> Result<ReportState, SageError> {
    state.ensure_analysts()?;
    state.ensure_interviews()?;

    let mut sections = Vec::with_capacity(state.analysts.len());
    for (persona, interview) in state.analysts.iter().zip(&state.interviews) {
        let body = if interview.turns.is_empty() {
            debug!(analyst = %persona.name, "empty transcript; skipping section call");
            EMPTY_INTERVIEW_NOTE.to_string()
        } else {
            services
                .ask(
                    ChatRequest::new(Purpose::Section)
                        .system(prompts::section(&state.topic, persona))
                        .user(interview.transcript()),
                )
                .await?
        };

        sections.push(Section {
            heading: persona.heading(),
            body,
        });
    }

    info!(sections = sections.len(), "report sections written");
    Ok(state.with_sections(sections))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::encyclopedia::StubEncyclopedia;
    use crate::llm::ChatModel;
    use crate::search::StubSearch;
    use crate::state::{Interview, Persona, Turn};

    /// Writes the transcript it was given back as the section body.
    struct TranscriptEcho;

    #[async_trait]
    impl ChatModel for TranscriptEcho {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &ChatRequest) -> Result<String, SageError> {
            Ok(request
                .messages
                .last()
                .map(|msg| msg.content.clone())
                .unwrap_or_default())
        }
    }

    fn echo_services() -> Services {
        Services::new(
            Arc::new(TranscriptEcho),
            Arc::new(StubSearch::new()),
            Arc::new(StubEncyclopedia::new()),
        )
    }

    fn interview_as(persona: &Persona) -> Interview {
        Interview {
            persona: persona.clone(),
            turns: vec![Turn {
                question: format!("As {}, what matters?", persona.role.to_uppercase()),
                answer: "It depends.".into(),
                search_query: "what matters".into(),
                references: Vec::new(),
            }],
        }
    }

    #[tokio::test]
    async fn duplicate_names_keep_their_own_transcripts() {
        let analysts = vec![
            Persona::new("Ada", "Engineer", "Lab", ""),
            Persona::new("Ada", "Economist", "Bank", ""),
            Persona::new("Cy", "Lawyer", "Firm", ""),
        ];
        let interviews = analysts.iter().map(interview_as).collect();
        let state = ReportState::new("grid storage")
            .unwrap()
            .with_analysts(analysts)
            .with_interviews(interviews);

        let state = write_sections(&echo_services(), state).await.unwrap();

        assert_eq!(state.sections[0].heading, "## Ada, Engineer");
        assert!(state.sections[0].body.contains("As ENGINEER"));
        assert_eq!(state.sections[1].heading, "## Ada, Economist");
        assert!(state.sections[1].body.contains("As ECONOMIST"));
        assert!(state.sections[2].body.contains("As LAWYER"));
    }

    #[tokio::test]
    async fn empty_transcript_gets_placeholder_without_a_call() {
        let analysts = vec![
            Persona::new("A", "One", "Org", ""),
            Persona::new("B", "Two", "Org", ""),
            Persona::new("C", "Three", "Org", ""),
        ];
        let mut interviews: Vec<Interview> = analysts.iter().map(interview_as).collect();
        interviews[1].turns.clear();
        let state = ReportState::new("grid storage")
            .unwrap()
            .with_analysts(analysts)
            .with_interviews(interviews);

        let state = write_sections(&echo_services(), state).await.unwrap();
        assert_eq!(state.sections[1].body, EMPTY_INTERVIEW_NOTE);
    }

    #[tokio::test]
    async fn mismatched_interviews_are_rejected() {
        let analysts = vec![
            Persona::new("A", "One", "Org", ""),
            Persona::new("B", "Two", "Org", ""),
            Persona::new("C", "Three", "Org", ""),
        ];
        let mut interviews: Vec<Interview> = analysts.iter().map(interview_as).collect();
        interviews.swap(0, 2);
        let state = ReportState::new("grid storage")
            .unwrap()
            .with_analysts(analysts)
            .with_interviews(interviews);

        let err = write_sections(&echo_services(), state).await.unwrap_err();
        assert!(matches!(err, SageError::InvalidState(_)));
    }
}
