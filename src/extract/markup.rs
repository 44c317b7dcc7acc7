//! Text normalization applied to model replies before and after parsing.

use regex::Captures;

use super::sections;
use crate::scoring::Category;

pub const ARROW: char = '→';

pub const OVERALL_COMMENTS_PLACEHOLDER: &str =
    "Please see the detailed feedback above for strengths and next steps.";

/// Folds the arrow spellings models produce into a single `→`.
///
/// A bare `->` is rewritten only when it is not part of an HTML comment
/// closer (`-->`), so strategic markers survive.
pub fn normalize_arrows(text: &str) -> String {
    let mut folded = text.to_string();
    for spelling in [
        "&rarr;", "&#8594;", "&#x2192;", "&#X2192;", "-&gt;", "â†’", "➔", "⟶",
    ] {
        folded = folded.replace(spelling, "→");
    }

    let mut out = String::with_capacity(folded.len());
    let mut prev: Option<char> = None;
    let mut chars = folded.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '-' && chars.peek() == Some(&'>') && prev != Some('-') {
            chars.next();
            out.push(ARROW);
            prev = Some(ARROW);
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

pub fn strip_tags(html: &str) -> String {
    regex!(r"(?s)<!--.*?-->|<[^>]*>").replace_all(html, "").into_owned()
}

pub fn decode_entities(text: &str) -> String {
    regex!(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);")
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "rarr" => Some(ARROW),
                    "ndash" => Some('–'),
                    "mdash" => Some('—'),
                    "bull" => Some('•'),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Plain text of an HTML fragment with whitespace collapsed.
pub fn plain_text(html: &str) -> String {
    let spaced = regex!(r"(?s)<!--.*?-->|<[^>]*>").replace_all(html, " ");
    decode_entities(&spaced)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Removes markdown code fences, keeping what they wrapped.
pub fn strip_fences(text: &str) -> String {
    let unfenced_json = regex!(r"(?is)`{3,}\s*json\s*(.*?)`{3,}").replace_all(text, "$1");
    regex!(r"(?s)`{3,}[a-zA-Z]*\s*(.*?)`{3,}")
        .replace_all(&unfenced_json, "$1")
        .into_owned()
}

/// Appends a placeholder overall-comments section when the model left it out.
pub fn ensure_overall_comments(html: &str) -> String {
    if regex!(r#"(?i)id\s*=\s*["']overall-comments["']"#).is_match(html) {
        return html.to_string();
    }
    format!(
        "{}\n<h2 style=\"font-size:18px;\">Overall Comments</h2>\n<div id=\"overall-comments\"><p>{}</p></div>",
        html.trim_end(),
        OVERALL_COMMENTS_PLACEHOLDER
    )
}

/// Closes whatever a truncated JSON fragment left open: a dangling string,
/// then brackets and braces innermost first. A trailing comma or colon is
/// dropped or completed so the result has a chance to parse.
pub fn autoclose_json(fragment: &str) -> String {
    let mut out = fragment.trim().to_string();
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in out.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    if in_string {
        out.push('"');
    }
    let trimmed_len = out.trim_end().trim_end_matches(',').len();
    out.truncate(trimmed_len);
    if out.ends_with(':') {
        out.push_str(" null");
    }
    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

pub fn strip_scores_block(html: &str) -> String {
    regex!(r"(?s)\s*<!--\s*SCORES_JSON_START\s*-->.*?(?:<!--\s*SCORES_JSON_END\s*-->|\z)")
        .replace_all(html, "")
        .into_owned()
}

/// Wraps each criterion section and the final score heading in
/// `EXTRACT_<NAME>_START` / `_END` comments. Sections that already carry
/// their markers are left alone.
pub fn annotate_sections(html: &str) -> String {
    let headings = sections::headings(html);
    let mut spans: Vec<(usize, usize, &'static str)> = Vec::new();

    for category in Category::ALL {
        let start_marker = marker_start(category.marker());
        if html.contains(&start_marker) {
            continue;
        }
        if let Some(span) = sections::heading_span(html, &headings, category.title_pattern()) {
            spans.push((span.start, span.end, category.marker()));
        }
    }

    if !html.contains(&marker_start(FINAL_SCORE_MARKER)) {
        if let Some(heading) = headings
            .iter()
            .find(|h| regex!(r"(?i)Final\s+Score").is_match(&h.text))
        {
            spans.push((heading.start, heading.end, FINAL_SCORE_MARKER));
        }
    }

    // Insert back to front so earlier offsets stay valid.
    spans.sort_by(|a, b| b.0.cmp(&a.0));
    let mut annotated = html.to_string();
    for (start, end, marker) in spans {
        annotated.insert_str(end, &marker_end(marker));
        annotated.insert_str(start, &marker_start(marker));
    }
    annotated
}

pub const FINAL_SCORE_MARKER: &str = "FINAL_SCORE";

pub fn marker_start(name: &str) -> String {
    format!("<!-- EXTRACT_{}_START -->", name)
}

pub fn marker_end(name: &str) -> String {
    format!("<!-- EXTRACT_{}_END -->", name)
}

/// Rewrites the "Final Score" line to the reconciled total, appending one
/// when the reply has none. A total written after a bold label on the same
/// line (`<strong>Final Score:</strong> 75/100`) is replaced with it.
pub fn stamp_final_score(html: &str, new_total: u32, previous_total: Option<u32>) -> String {
    let line = match previous_total {
        Some(previous) => format!(
            "<strong>Final Score (Previous {} New): {}/100 {} {}/100</strong>",
            ARROW, previous, ARROW, new_total
        ),
        None => format!("<strong>Final Score: {}/100</strong>", new_total),
    };

    let pattern = regex!(
        r"(?is)<strong>\s*Final\s+Score.*?</strong>(?:[ \t]*\d+[ \t]*/[ \t]*100\b(?:[ \t]*→[ \t]*\d+[ \t]*/[ \t]*100\b)?)?"
    );
    if pattern.is_match(html) {
        return pattern.replace(html, regex::NoExpand(&line)).into_owned();
    }

    let heading = format!("<h2 style=\"font-size:16px;\"><p>{}</p></h2>", line);
    match html.find("<!-- SCORES_JSON_START") {
        Some(at) => {
            let mut stamped = html.to_string();
            stamped.insert_str(at, &format!("{}\n", heading));
            stamped
        }
        None => format!("{}\n{}", html.trim_end(), heading),
    }
}
