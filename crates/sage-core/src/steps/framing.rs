use tracing::info;

use crate::error::SageError;
use crate::llm::{ChatRequest, Purpose};
use crate::prompts;
use crate::services::Services;
use crate::state::ReportState;

/// Write the introduction and the conclusion: two calls, once every section exists.
pub async fn write_framing(
    services: &Services,
    state: ReportState,
) -> Result<ReportState, SageError> {
    state.ensure_sections()?;
    let digest = prompts::sections_digest(&state.sections);

    let introduction = services
        .ask(
            ChatRequest::new(Purpose::Introduction)
                .system(prompts::introduction(&state.topic))
                .user(digest.as_str()),
        )
        .await?;

    let conclusion = services
        .ask(
            ChatRequest::new(Purpose::Conclusion)
                .system(prompts::conclusion(&state.topic))
                .user(digest),
        )
        .await?;

    info!(
        introduction_chars = introduction.len(),
        conclusion_chars = conclusion.len(),
        "introduction and conclusion written"
    );

    Ok(state.with_framing(introduction.trim().to_string(), conclusion.trim().to_string()))
}
