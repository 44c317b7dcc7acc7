//! Section-based score recovery: strategic markers, then headings, then a
//! scan of the whole document.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

use super::markup::{self, ARROW};
use crate::scoring::Category;

/// Which extraction layer resolved a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    JsonBlock,
    Marker,
    Heading,
    Document,
}

/// A score read from one section. `previous` is set when the section shows
/// a "previous → new" pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentScore {
    pub new: i64,
    pub previous: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Heading {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// HTML `<h1>`-`<h3>` elements and markdown `#`-`###` lines, in document order.
pub fn headings(text: &str) -> Vec<Heading> {
    let html = regex!(r"(?is)<h[1-3][^>]*>(.*?)</h[1-3]\s*>");
    let markdown = regex!(r"(?m)^[ \t]*#{1,3}[ \t]+([^\n]*)$");

    let mut found: Vec<Heading> = html
        .captures_iter(text)
        .chain(markdown.captures_iter(text))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Heading {
                start: whole.start(),
                end: whole.end(),
                text: markup::plain_text(caps.get(1)?.as_str()),
            })
        })
        .collect();
    found.sort_by_key(|h| h.start);
    found
}

/// From the first heading matching `title_pattern` up to the next heading.
pub fn heading_span(text: &str, headings: &[Heading], title_pattern: &str) -> Option<Range<usize>> {
    let title = Regex::new(&format!("(?i){}", title_pattern)).ok()?;
    let index = headings.iter().position(|h| title.is_match(&h.text))?;
    let end = headings
        .get(index + 1)
        .map_or(text.len(), |next| next.start);
    Some(headings[index].start..end)
}

/// Text between `EXTRACT_<marker>_START` and `_END`, when both exist.
pub fn marker_segment<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start_tag = Regex::new(&format!(r"<!--\s*EXTRACT_{}_START\s*-->", marker)).ok()?;
    let end_tag = Regex::new(&format!(r"<!--\s*EXTRACT_{}_END\s*-->", marker)).ok()?;
    let open = start_tag.find(text)?;
    let close = end_tag.find_at(text, open.end())?;
    Some(&text[open.end()..close.start()])
}

/// Applies the last-score rule to one section.
///
/// An explicit "a/max → b/max" pair wins and yields `b`; otherwise the
/// number after a lone arrow; otherwise the last `N/max` on the Score line;
/// otherwise the last `N/max` anywhere in the segment.
pub fn segment_score(segment: &str, max: u32) -> Option<SegmentScore> {
    if segment.trim().is_empty() {
        return None;
    }
    let segment = markup::decode_entities(segment);

    let pair = Regex::new(&format!(
        r"\b(\d+)\s*/\s*{max}\b\s*(?:</?[a-z]+[^>]*>\s*)*{ARROW}\s*(?:</?[a-z]+[^>]*>\s*)*(\d+)\s*/\s*{max}\b"
    ))
    .ok()?;
    if let Some(caps) = pair.captures(&segment) {
        return Some(SegmentScore {
            new: caps[2].parse().ok()?,
            previous: caps[1].parse().ok(),
        });
    }

    let after_arrow = Regex::new(&format!(r"{ARROW}\s*(\d+)\s*/\s*{max}\b")).ok()?;
    if let Some(caps) = after_arrow.captures(&segment) {
        return Some(SegmentScore {
            new: caps[1].parse().ok()?,
            previous: None,
        });
    }

    let fraction = Regex::new(&format!(r"\b(\d+)\s*/\s*{max}\b")).ok()?;
    let last_in = |haystack: &str| -> Option<i64> {
        fraction
            .captures_iter(haystack)
            .last()
            .and_then(|caps| caps[1].parse().ok())
    };

    let score_line = regex!(r"(?is)<p>\s*<strong>\s*Score[^:]*:\s*</strong>(.*?)</p>");
    if let Some(line) = score_line.captures(&segment) {
        if let Some(new) = last_in(&line[1]) {
            return Some(SegmentScore {
                new,
                previous: None,
            });
        }
    }

    last_in(&segment).map(|new| SegmentScore {
        new,
        previous: None,
    })
}

/// Resolves one category through the marker, heading and whole-document
/// layers in that order.
pub fn locate(text: &str, headings: &[Heading], category: Category) -> Option<(ScoreSource, SegmentScore)> {
    let max = category.max();

    if let Some(score) = marker_segment(text, category.marker()).and_then(|s| segment_score(s, max)) {
        debug!("{} resolved from strategic markers", category.key());
        return Some((ScoreSource::Marker, score));
    }

    if let Some(score) = heading_span(text, headings, category.title_pattern())
        .and_then(|span| segment_score(&text[span], max))
    {
        debug!("{} resolved from its heading section", category.key());
        return Some((ScoreSource::Heading, score));
    }

    if let Some(score) = document_score(text, category) {
        debug!("{} resolved from a whole-document scan", category.key());
        return Some((ScoreSource::Document, score));
    }

    None
}

/// Last-resort scan: every mention of the category title opens a window that
/// runs to the next mention of any category title; the last window holding a
/// score wins.
fn document_score(text: &str, category: Category) -> Option<SegmentScore> {
    let own = Regex::new(&format!("(?i){}", category.title_pattern())).ok()?;
    let any = Regex::new(&format!(
        "(?i){}",
        Category::ALL
            .iter()
            .map(|c| format!("(?:{})", c.title_pattern()))
            .collect::<Vec<_>>()
            .join("|")
    ))
    .ok()?;

    own.find_iter(text)
        .filter_map(|mention| {
            let end = any
                .find_at(text, mention.end())
                .map_or(text.len(), |next| next.start());
            segment_score(&text[mention.end()..end], category.max())
        })
        .last()
}

/// The total the model wrote on its "Final Score" line, if any.
pub fn final_score_claim(text: &str) -> Option<i64> {
    let mention = regex!(r"(?i)Final\s+Score").find_iter(text).last()?;
    let window_end = text[mention.end()..]
        .char_indices()
        .nth(160)
        .map_or(text.len(), |(offset, _)| mention.end() + offset);
    segment_score(&text[mention.end()..window_end], 100).map(|score| score.new)
}
