//! The record threaded through the report workflow.
//!
//! A [`ReportState`] starts with only the topic populated. Each step consumes one
//! snapshot and returns the next; nothing here is persisted.

use serde::{Deserialize, Serialize};

use crate::error::SageError;

/// Number of analyst personas a report is built from.
pub const ANALYST_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub role: String,
    pub affiliation: String,
    #[serde(default)]
    pub description: String,
}

impl Persona {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        affiliation: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            affiliation: affiliation.into(),
            description: description.into(),
        }
    }

    /// Markdown heading used for this persona's report section.
    pub fn heading(&self) -> String {
        format!("## {}, {}", self.name, self.role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceOrigin {
    Web,
    Encyclopedia,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    pub url: String,
    pub origin: ReferenceOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub search_query: String,
    #[serde(default)]
    pub references: Vec<Reference>,
}

/// One persona's question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interview {
    pub persona: Persona,
    pub turns: Vec<Turn>,
}

impl Interview {
    pub fn new(persona: Persona) -> Self {
        Self {
            persona,
            turns: Vec::new(),
        }
    }

    /// Plain-text transcript, `Q:`/`A:` per turn.
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("Q: {}\nA: {}", turn.question, turn.answer))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.turns.iter().flat_map(|turn| turn.references.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportState {
    pub topic: String,
    #[serde(default)]
    pub analysts: Vec<Persona>,
    #[serde(default)]
    pub interviews: Vec<Interview>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub introduction: String,
    #[serde(default)]
    pub conclusion: String,
    #[serde(default)]
    pub final_report: String,
}

impl ReportState {
    /// Start a report for `topic`. Blank topics are rejected before any external call.
    pub fn new(topic: &str) -> Result<Self, SageError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(SageError::EmptyTopic);
        }
        Ok(Self {
            topic: topic.to_string(),
            ..Self::default()
        })
    }

    pub fn with_analysts(self, analysts: Vec<Persona>) -> Self {
        Self { analysts, ..self }
    }

    pub fn with_interviews(self, interviews: Vec<Interview>) -> Self {
        Self { interviews, ..self }
    }

    pub fn with_sections(self, sections: Vec<Section>) -> Self {
        Self { sections, ..self }
    }

    pub fn with_framing(self, introduction: String, conclusion: String) -> Self {
        Self {
            introduction,
            conclusion,
            ..self
        }
    }

    pub fn with_final_report(self, final_report: String) -> Self {
        Self {
            final_report,
            ..self
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.final_report.is_empty()
    }

    /// References across all interviews, unique by URL, in first-seen order.
    pub fn references(&self) -> Vec<&Reference> {
        let mut seen = std::collections::HashSet::new();
        self.interviews
            .iter()
            .flat_map(Interview::references)
            .filter(|reference| !reference.url.is_empty())
            .filter(|reference| seen.insert(reference.url.as_str()))
            .collect()
    }

    pub(crate) fn ensure_analysts(&self) -> Result<(), SageError> {
        if self.analysts.len() != ANALYST_COUNT {
            return Err(SageError::InvalidState(format!(
                "expected {ANALYST_COUNT} analysts, found {}",
                self.analysts.len()
            )));
        }
        Ok(())
    }

    /// Interviews line up one-to-one with analysts, by position.
    pub(crate) fn ensure_interviews(&self) -> Result<(), SageError> {
        if self.interviews.len() != self.analysts.len() {
            return Err(SageError::InvalidState(format!(
                "expected {} interviews, found {}",
                self.analysts.len(),
                self.interviews.len()
            )));
        }
        if let Some((idx, persona)) = self
            .analysts
            .iter()
            .zip(&self.interviews)
            .enumerate()
            .find_map(|(idx, (persona, interview))| {
                (interview.persona != *persona).then_some((idx, persona))
            })
        {
            return Err(SageError::InvalidState(format!(
                "interview {} does not belong to {}",
                idx + 1,
                persona.heading().trim_start_matches("## ")
            )));
        }
        Ok(())
    }

    pub(crate) fn ensure_sections(&self) -> Result<(), SageError> {
        if self.sections.len() != self.analysts.len() {
            return Err(SageError::InvalidState(format!(
                "{} sections for {} analysts",
                self.sections.len(),
                self.analysts.len()
            )));
        }
        Ok(())
    }
}
