//! The machine-readable score block models are asked to append:
//!
//! ```text
//! <!-- SCORES_JSON_START -->
//! {"content_and_ideas": 18, ..., "final_score": 72}
//! <!-- SCORES_JSON_END -->
//! ```

use serde_json::Value;
use tracing::{debug, warn};

use super::markup;
use crate::scoring::{Category, PartialScores};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonScores {
    pub scores: PartialScores,
    pub final_score: Option<i64>,
}

/// Reads the score block. A block whose end sentinel was cut off is closed
/// up and parsed anyway. Returns `None` when there is no block or it cannot
/// be parsed into an object.
pub fn parse(text: &str) -> Option<JsonScores> {
    let open = regex!(r"<!--\s*SCORES_JSON_START\s*-->").find(text)?;
    let rest = &text[open.end()..];

    let body = match regex!(r"<!--\s*SCORES_JSON_END\s*-->").find(rest) {
        Some(close) => rest[..close.start()].to_string(),
        None => {
            warn!("Score block has no end sentinel, attempting to close it");
            let cut = rest.find("<!--").unwrap_or(rest.len());
            markup::autoclose_json(&rest[..cut])
        }
    };

    let body = markup::strip_fences(&body);
    let object = match serde_json::from_str::<Value>(body.trim()) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!("Score block is not a JSON object");
            return None;
        }
        Err(e) => {
            warn!("Score block did not parse: {}", e);
            return None;
        }
    };

    let mut parsed = JsonScores::default();
    for category in Category::ALL {
        let value = object
            .get(category.block_key())
            .or_else(|| object.get(category.key()));
        if let Some(value) = value.and_then(coerce) {
            parsed.scores.set(category, value);
        }
    }
    parsed.final_score = object.get("final_score").and_then(coerce);

    debug!(
        "Score block resolved {} of {} categories",
        Category::ALL.len() - parsed.scores.missing().len(),
        Category::ALL.len()
    );
    Some(parsed)
}

/// Integer from a number, a numeric string (`"18"`, `"18/25"`) or nothing.
fn coerce(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let digits = regex!(r"^\s*(-?\d+(?:\.\d+)?)").captures(s)?;
            digits[1].parse::<f64>().ok().map(|f| f.round() as i64)
        }
        _ => None,
    }
}
