use std::fmt::Write as _;

use crate::error::SageError;
use crate::state::ReportState;

/// Assemble the final Markdown report. No external calls.
///
/// Layout: title, introduction, one section per analyst, conclusion, references.
pub fn finalize_report(state: ReportState) -> Result<ReportState, SageError> {
    state.ensure_sections()?;
    if state.sections.is_empty() {
        return Err(SageError::InvalidState("no report sections".into()));
    }
    if state.introduction.trim().is_empty() || state.conclusion.trim().is_empty() {
        return Err(SageError::InvalidState(
            "introduction and conclusion must be written before finalising".into(),
        ));
    }

    let mut report = String::new();
    let _ = writeln!(report, "# {}\n", state.topic);
    let _ = writeln!(report, "## Introduction\n\n{}\n", state.introduction.trim());

    for section in &state.sections {
        let _ = writeln!(report, "{}\n\n{}\n", section.heading, section.body.trim());
    }

    let _ = writeln!(report, "## Conclusion\n\n{}", state.conclusion.trim());

    let references = state.references();
    if !references.is_empty() {
        let _ = writeln!(report, "\n## References\n");
        for (idx, reference) in references.iter().enumerate() {
            let title = if reference.title.trim().is_empty() {
                reference.url.as_str()
            } else {
                reference.title.trim()
            };
            let _ = writeln!(report, "{}. [{}]({})", idx + 1, title, reference.url);
        }
    }

    Ok(state.with_final_report(report))
}
