use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{SageError, Service};
use crate::llm::{ChatRequest, Purpose};
use crate::prompts;
use crate::services::Services;
use crate::state::{ANALYST_COUNT, Persona, ReportState};

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*([\[{].*?[\]}])\s*```").expect("invalid fenced json regex")
});

#[derive(Deserialize)]
#[serde(untagged)]
enum PersonaPayload {
    Wrapped { analysts: Vec<RawPersona> },
    Bare(Vec<RawPersona>),
}

#[derive(Deserialize)]
struct RawPersona {
    #[serde(default)]
    name: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    affiliation: String,
    #[serde(default, alias = "focus")]
    description: String,
}

/// Fallback personas used when the model's reply cannot supply all of them.
pub fn default_personas() -> Vec<Persona> {
    vec![
        Persona::new(
            "Default Analyst 1",
            "General Researcher",
            "University",
            "Broad survey of the evidence",
        ),
        Persona::new(
            "Default Analyst 2",
            "Industry Expert",
            "Tech Company",
            "Practical adoption and market effects",
        ),
        Persona::new(
            "Default Analyst 3",
            "Policy Advisor",
            "Government Think Tank",
            "Regulation and societal impact",
        ),
    ]
}

/// Parse a persona list out of a model reply.
///
/// Accepts `{"analysts": [...]}` or a bare array, optionally inside a code fence or
/// surrounded by prose. Entries without a name or role are dropped.
pub fn parse_personas(reply: &str) -> Result<Vec<Persona>, SageError> {
    let candidate = extract_json(reply);
    let payload: PersonaPayload = serde_json::from_str(candidate)
        .map_err(|err| SageError::malformed(Service::Chat, format!("persona JSON: {err}")))?;

    let raw = match payload {
        PersonaPayload::Wrapped { analysts } => analysts,
        PersonaPayload::Bare(analysts) => analysts,
    };

    Ok(raw
        .into_iter()
        .filter(|persona| !persona.name.trim().is_empty() && !persona.role.trim().is_empty())
        .map(|persona| {
            let affiliation = if persona.affiliation.trim().is_empty() {
                "Independent".to_string()
            } else {
                persona.affiliation.trim().to_string()
            };
            Persona::new(
                persona.name.trim(),
                persona.role.trim(),
                affiliation,
                persona.description.trim(),
            )
        })
        .collect())
}

fn extract_json(reply: &str) -> &str {
    if let Some(captures) = FENCED_JSON.captures(reply) {
        if let Some(body) = captures.get(1) {
            return body.as_str();
        }
    }

    let trimmed = reply.trim();
    let object = trimmed.find('{').zip(trimmed.rfind('}'));
    let array = trimmed.find('[').zip(trimmed.rfind(']'));
    let span = match (object, array) {
        (Some(obj), Some(arr)) if arr.0 < obj.0 => Some(arr),
        (Some(obj), _) => Some(obj),
        (None, arr) => arr,
    };

    match span {
        Some((start, end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Ask the model for the analyst personas. Always yields exactly [`ANALYST_COUNT`].
pub async fn generate_personas(
    services: &Services,
    state: ReportState,
) -> Result<ReportState, SageError> {
    let request = ChatRequest::new(Purpose::Personas)
        .system(prompts::personas(&state.topic, ANALYST_COUNT))
        .user(format!("Topic: {}", state.topic));
    let reply = services.ask(request).await?;

    let mut analysts = match parse_personas(&reply) {
        Ok(analysts) => analysts,
        Err(err) => {
            warn!(error = %err, "could not parse personas; using defaults");
            Vec::new()
        }
    };
    analysts.truncate(ANALYST_COUNT);

    if analysts.len() < ANALYST_COUNT {
        warn!(
            parsed = analysts.len(),
            expected = ANALYST_COUNT,
            "filling missing personas with defaults"
        );
        let missing = ANALYST_COUNT - analysts.len();
        let fillers: Vec<Persona> = default_personas()
            .into_iter()
            .filter(|fallback| analysts.iter().all(|p| p.name != fallback.name))
            .take(missing)
            .collect();
        analysts.extend(fillers);
    }

    info!(
        topic = %state.topic,
        analysts = ?analysts.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        "analyst personas ready"
    );

    Ok(state.with_analysts(analysts))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::encyclopedia::StubEncyclopedia;
    use crate::llm::ChatModel;
    use crate::search::StubSearch;

    /// Answers every request with the same reply.
    struct CannedChat(String);

    #[async_trait]
    impl ChatModel for CannedChat {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _request: &ChatRequest) -> Result<String, SageError> {
            Ok(self.0.clone())
        }
    }

    async fn personas_from(reply: &str) -> Vec<Persona> {
        let services = Services::new(
            Arc::new(CannedChat(reply.to_string())),
            Arc::new(StubSearch::new()),
            Arc::new(StubEncyclopedia::new()),
        );
        let state = ReportState::new("tidal energy").unwrap();
        generate_personas(&services, state).await.unwrap().analysts
    }

    fn persona_json(count: usize) -> String {
        let entries: Vec<String> = (1..=count)
            .map(|n| format!(r#"{{"name": "Analyst {n}", "role": "Role {n}"}}"#))
            .collect();
        format!(r#"{{"analysts": [{}]}}"#, entries.join(", "))
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back_to_defaults() {
        let analysts = personas_from("Sorry, I would rather not.").await;
        assert_eq!(analysts, default_personas());
    }

    #[tokio::test]
    async fn short_list_is_padded_without_name_clashes() {
        let reply = r#"[{"name": "Default Analyst 1", "role": "Hydrologist"}]"#;
        let analysts = personas_from(reply).await;

        assert_eq!(analysts.len(), ANALYST_COUNT);
        assert_eq!(analysts[0].role, "Hydrologist");
        let names: Vec<&str> = analysts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Default Analyst 1", "Default Analyst 2", "Default Analyst 3"]
        );
    }

    #[tokio::test]
    async fn long_list_is_truncated_in_order() {
        let analysts = personas_from(&persona_json(5)).await;

        assert_eq!(analysts.len(), ANALYST_COUNT);
        assert_eq!(analysts[0].name, "Analyst 1");
        assert_eq!(analysts[2].name, "Analyst 3");
    }

    #[test]
    fn parses_fenced_wrapped_payload() {
        let reply = "Here you go:\n```json\n{\"analysts\": [{\"name\": \"Ada\", \"role\": \"Engineer\", \"affiliation\": \"Lab\", \"focus\": \"reliability\"}]}\n```\nEnjoy.";
        let personas = parse_personas(reply).unwrap();
        assert_eq!(personas.len(), 1);
        assert_eq!(personas[0].name, "Ada");
        assert_eq!(personas[0].description, "reliability");
    }

    #[test]
    fn parses_bare_array_with_prose() {
        let reply = r#"Sure! [{"name": "Bo", "role": "Economist"}, {"name": "", "role": "Ghost"}]"#;
        let personas = parse_personas(reply).unwrap();
        assert_eq!(personas.len(), 1);
        assert_eq!(personas[0].affiliation, "Independent");
    }

    #[test]
    fn prose_without_json_is_malformed() {
        let err = parse_personas("I cannot help with that.").unwrap_err();
        assert!(matches!(err, SageError::MalformedResponse { .. }));
    }

    #[test]
    fn defaults_are_three_distinct_personas() {
        let defaults = default_personas();
        assert_eq!(defaults.len(), ANALYST_COUNT);
        assert_eq!(defaults[2].affiliation, "Government Think Tank");
    }
}
