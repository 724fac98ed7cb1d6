//! Workflow steps.
//!
//! Each step takes the current [`ReportState`](crate::ReportState) snapshot and the
//! external [`Services`](crate::Services), and returns the next snapshot.

mod finalize;
mod framing;
mod interview;
mod personas;
mod sections;

pub use finalize::finalize_report;
pub use framing::write_framing;
pub use interview::{conduct_interview, conduct_interviews, is_closing_remark};
pub use personas::{default_personas, generate_personas, parse_personas};
pub use sections::write_sections;

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Knobs that shape a report session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    pub max_turns: usize,
    pub max_search_results: usize,
    pub max_encyclopedia_docs: usize,
    pub parallel_interviews: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_turns: 2,
            max_search_results: 3,
            max_encyclopedia_docs: 1,
            parallel_interviews: false,
        }
    }
}

impl WorkflowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_turns: config.interview.max_turns.max(1),
            max_search_results: config.search.max_results,
            max_encyclopedia_docs: config.encyclopedia.max_docs,
            parallel_interviews: config.workflow.parallel_interviews,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn with_parallel_interviews(mut self, parallel: bool) -> Self {
        self.parallel_interviews = parallel;
        self
    }
}
