//! Essay grading with resubmission tracking.
//!
//! A grading pass asks a language model for rubric feedback, recovers five
//! category scores from whatever shape the reply takes, and, for
//! resubmissions, grades against the student's previous round or applies the
//! copy penalty when the new essay reproduces the suggested revision.

/// Lazily compiled static regex.
macro_rules! regex {
    ($re:expr $(,)?) => {{
        static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| regex::Regex::new($re).expect("static pattern compiles"))
    }};
}

pub mod agents;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod routes;
pub mod scoring;
pub mod similarity;
pub mod state;
pub mod store;
pub mod templates;

pub use error::{GradingError, GradingWarning};
pub use pipeline::{GradingOrchestrator, GradingOutcome};
