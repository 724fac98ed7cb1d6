//! Prompt templates. The wording is opaque to the workflow; only the shape matters.

use crate::state::{Persona, Section};

pub fn personas(topic: &str, count: usize) -> String {
    format!(
        "Create {count} diverse AI analyst personas for the topic: {topic}.\n\
         Output JSON only, with a single key 'analysts' containing an array of objects, \
         each with the fields: name, role, affiliation, description. \
         The description states the analyst's focus in one sentence."
    )
}

pub fn interviewer(topic: &str, persona: &Persona) -> String {
    let focus = if persona.description.is_empty() {
        String::new()
    } else {
        format!(" Your focus: {}.", persona.description)
    };
    format!(
        "You are {name}, {role} at {affiliation}.{focus}\n\
         You are interviewing an expert about {topic}. Ask one specific question at a time \
         and build on the previous answers. When you have nothing left to ask, say \
         \"Thank you so much for your help!\" and nothing else.",
        name = persona.name,
        role = persona.role,
        affiliation = persona.affiliation,
    )
}

pub const NEXT_QUESTION: &str = "Ask your next question.";

pub const SEARCH_QUERY: &str = "Generate a concise web search query that would help answer the \
     following question. Reply with the query only.";

pub fn expert(topic: &str, context: &str) -> String {
    format!(
        "You are an expert answering questions about {topic}.\n\
         Use this context to answer, and say so when it is insufficient:\n{context}"
    )
}

pub fn section(topic: &str, persona: &Persona) -> String {
    format!(
        "Summarize this interview about {topic} conducted by {name} ({role}) as a report \
         section of two or three paragraphs. Do not add a heading.",
        name = persona.name,
        role = persona.role,
    )
}

pub fn introduction(topic: &str) -> String {
    format!(
        "Write a short introduction for a research report on {topic}. \
         The report consists of the sections below. Do not add a heading."
    )
}

pub fn conclusion(topic: &str) -> String {
    format!(
        "Write a short conclusion for a research report on {topic}. \
         The report consists of the sections below. Do not add a heading."
    )
}

pub fn sections_digest(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|section| format!("{}\n{}", section.heading, section.body))
        .collect::<Vec<_>>()
        .join("\n\n")
}
