//! Recovers scores and prose from a model's feedback reply.
//!
//! Layers run in a fixed order per category: the JSON score block, the
//! strategic markers, the criterion heading, then the whole document.
//! Whatever no layer resolves is reported as missing.

pub mod json_block;
pub mod markup;
pub mod prose;
pub mod sections;

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::scoring::{Category, PartialScores};

pub use prose::{CriterionProse, FeedbackProse};
pub use sections::ScoreSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFeedback {
    pub scores: PartialScores,
    pub sources: BTreeMap<Category, ScoreSource>,
    pub claimed_final: Option<i64>,
    /// Previous scores the model restated in "previous → new" pairs.
    pub claimed_previous: BTreeMap<Category, i64>,
    pub prose: FeedbackProse,
}

impl ExtractedFeedback {
    pub fn missing(&self) -> Vec<Category> {
        self.scores.missing()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeedbackExtractor;

impl FeedbackExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic: the same input always produces the same output.
    pub fn extract(&self, raw: &str) -> ExtractedFeedback {
        let text = markup::normalize_arrows(&markup::strip_fences(raw));
        let headings = sections::headings(&text);
        let block = json_block::parse(&text);

        let mut scores = PartialScores::new();
        let mut sources = BTreeMap::new();
        let mut claimed_previous = BTreeMap::new();

        for category in Category::ALL {
            let located = sections::locate(&text, &headings, category);

            if let Some(value) = block.as_ref().and_then(|b| b.scores.get(category)) {
                scores.set(category, value);
                sources.insert(category, ScoreSource::JsonBlock);
            } else if let Some((source, segment)) = located {
                scores.set(category, segment.new);
                sources.insert(category, source);
            }

            if let Some(previous) = located.and_then(|(_, segment)| segment.previous) {
                claimed_previous.insert(category, previous);
            }
        }

        let claimed_final = block
            .as_ref()
            .and_then(|b| b.final_score)
            .or_else(|| sections::final_score_claim(&text));

        debug!("Score sources: {:?}", sources);
        if !scores.is_complete() {
            info!("Extraction could not resolve {:?}", scores.missing());
        }

        ExtractedFeedback {
            scores,
            sources,
            claimed_final,
            claimed_previous,
            prose: prose::extract(&text, &headings),
        }
    }

    /// Cleans a raw reply into the form that is stored: fences removed,
    /// arrows normalized, overall comments guaranteed and every section
    /// wrapped in strategic markers.
    pub fn prepare(&self, raw: &str) -> String {
        let text = markup::normalize_arrows(&markup::strip_fences(raw));
        let text = markup::ensure_overall_comments(&text);
        markup::annotate_sections(&text)
    }
}
