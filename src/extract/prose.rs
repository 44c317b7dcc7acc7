use regex::Regex;
use serde::{Deserialize, Serialize};

use super::markup::{self, OVERALL_COMMENTS_PLACEHOLDER};
use super::sections::{self, Heading};
use crate::scoring::Category;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionProse {
    pub category: Category,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
}

/// The human-readable parts of a feedback reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackProse {
    pub overall_comments: String,
    pub criteria: Vec<CriterionProse>,
}

impl FeedbackProse {
    /// One line per criterion listing what still needs work, for use as
    /// context in the next round's prompt.
    pub fn key_points(&self) -> String {
        self.criteria
            .iter()
            .filter(|c| !c.improvements.is_empty())
            .map(|c| format!("{}: {}\n", c.category.title(), c.improvements.join("; ")))
            .collect()
    }
}

pub fn extract(text: &str, headings: &[Heading]) -> FeedbackProse {
    let criteria = Category::ALL
        .into_iter()
        .filter_map(|category| {
            let segment = criterion_segment(text, headings, category)?;
            let strengths = list_after(segment, r"Strengths");
            let improvements = list_after(segment, r"Areas\s+for\s+Improvement");
            Some(CriterionProse {
                category,
                strengths,
                improvements,
            })
        })
        .collect();

    FeedbackProse {
        overall_comments: overall_comments(text, headings),
        criteria,
    }
}

fn criterion_segment<'a>(text: &'a str, headings: &[Heading], category: Category) -> Option<&'a str> {
    sections::marker_segment(text, category.marker())
        .or_else(|| sections::heading_span(text, headings, category.title_pattern()).map(|span| &text[span]))
}

fn overall_comments(text: &str, headings: &[Heading]) -> String {
    let from_div = regex!(r#"(?is)<div\s+id\s*=\s*["']overall-comments["'][^>]*>(.*?)</div>"#)
        .captures(text)
        .map(|caps| markup::plain_text(&caps[1]));

    let comments = from_div.or_else(|| {
        let span = sections::heading_span(text, headings, r"Overall\s+Comments")?;
        let heading = headings.iter().find(|h| h.start == span.start)?;
        let body = &text[heading.end..span.end];
        Some(markup::plain_text(&markup::strip_scores_block(body)))
    });

    match comments {
        Some(c) if !c.is_empty() => c,
        _ => OVERALL_COMMENTS_PLACEHOLDER.to_string(),
    }
}

/// Bullet items following a bold label such as "Strengths:". Handles a
/// nested `<ul>` list and markdown `-`/`*` bullets.
fn list_after(segment: &str, label: &str) -> Vec<String> {
    let html = Regex::new(&format!(r"(?is){}\s*:?.*?<ul[^>]*>(.*?)</ul>", label));
    if let Ok(html) = html {
        if let Some(caps) = html.captures(segment) {
            let items: Vec<String> = regex!(r"(?is)<li[^>]*>(.*?)(?:</li>|<li|\z)")
                .captures_iter(&caps[1])
                .map(|item| markup::plain_text(&item[1]))
                .filter(|item| !item.is_empty())
                .collect();
            if !items.is_empty() {
                return items;
            }
        }
    }

    let Ok(label_line) = Regex::new(&format!(r"(?i){}\s*:?[^\n]*\n", label)) else {
        return Vec::new();
    };
    let Some(found) = label_line.find(segment) else {
        return Vec::new();
    };
    segment[found.end()..]
        .lines()
        .map(str::trim)
        .take_while(|line| line.starts_with('-') || line.starts_with('*'))
        .map(|line| markup::plain_text(line.trim_start_matches(['-', '*'])))
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEEDBACK: &str = r#"<h2>1. Content and Ideas (25%)</h2>
<p><strong>Score:</strong> 18/25</p>
<ul>
<li><strong>Strengths:</strong><ul><li>Clear thesis.</li></ul></li>
<li><strong>Areas for Improvement:</strong><ul><li>Add evidence.</li><li>Expand the &quot;why&quot;.</li></ul></li>
</ul>
<h2>Overall Comments</h2>
<div id="overall-comments"><p>Solid   start.</p><p>Keep going.</p></div>"#;

    #[test]
    fn pulls_overall_comments_and_lists() {
        let prose = extract(FEEDBACK, &sections::headings(FEEDBACK));
        assert_eq!(prose.overall_comments, "Solid start. Keep going.");

        let content = &prose.criteria[0];
        assert_eq!(content.category, Category::Content);
        assert_eq!(content.strengths, vec!["Clear thesis."]);
        assert_eq!(content.improvements, vec!["Add evidence.", "Expand the \"why\"."]);
    }

    #[test]
    fn missing_overall_comments_get_a_placeholder() {
        let prose = extract("<p>Score: 5/10</p>", &[]);
        assert_eq!(prose.overall_comments, OVERALL_COMMENTS_PLACEHOLDER);
        assert!(prose.criteria.is_empty());
    }

    #[test]
    fn markdown_bullets_are_read() {
        let text = "## Mechanics\nScore: 6/10\nAreas for Improvement:\n- Check commas\n* Vary sentences\n\nMore text";
        let prose = extract(text, &sections::headings(text));
        assert_eq!(prose.criteria[0].improvements, vec!["Check commas", "Vary sentences"]);
    }

    #[test]
    fn key_points_summarise_improvements() {
        let prose = extract(FEEDBACK, &sections::headings(FEEDBACK));
        assert_eq!(
            prose.key_points(),
            "Content and Ideas: Add evidence.; Expand the \"why\".\n"
        );
    }
}
