use serde::{Deserialize, Serialize};
use std::fmt;

use crate::extract::markup;

/// How likely the essay is to be machine-written, as judged by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiLikelihood {
    Percent(u8),
    Unknown,
}

impl AiLikelihood {
    /// Reads `{"likelihood": N}`, tolerating code fences and stray prose.
    pub fn parse(reply: &str) -> Self {
        let cleaned = markup::strip_fences(reply);
        let cleaned = cleaned.trim();

        let from_json = serde_json::from_str::<serde_json::Value>(cleaned)
            .ok()
            .and_then(|v| v.get("likelihood").and_then(serde_json::Value::as_f64));
        let value = from_json.or_else(|| {
            regex!(r#"["']?likelihood["']?\s*:\s*(\d+(?:\.\d+)?)"#)
                .captures(cleaned)
                .and_then(|caps| caps[1].parse::<f64>().ok())
        });

        match value {
            Some(v) if (0.0..=100.0).contains(&v) => AiLikelihood::Percent(v.round() as u8),
            _ => AiLikelihood::Unknown,
        }
    }
}

impl fmt::Display for AiLikelihood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiLikelihood::Percent(p) => write!(f, "{}%", p),
            AiLikelihood::Unknown => f.write_str("unknown"),
        }
    }
}

/// Character cap on the text sent for detection.
pub const DETECTION_CHAR_LIMIT: usize = 8000;

pub fn truncate_for_detection(essay: &str) -> String {
    if essay.chars().count() <= DETECTION_CHAR_LIMIT {
        return essay.to_string();
    }
    let mut cut: String = essay.chars().take(DETECTION_CHAR_LIMIT - 3).collect();
    cut.push_str("...");
    cut
}
