use crate::extract::markup::ARROW;
use crate::scoring::{Category, CategoryScoreSet, MAX_TOTAL};

/// "first" through "fifth", then "6th", "11th", "22nd" and so on.
pub fn ordinal(n: u32) -> String {
    match n {
        1 => "first".to_string(),
        2 => "second".to_string(),
        3 => "third".to_string(),
        4 => "fourth".to_string(),
        5 => "fifth".to_string(),
        _ => {
            let suffix = match (n % 10, n % 100) {
                (_, 11..=13) => "th",
                (1, _) => "st",
                (2, _) => "nd",
                (3, _) => "rd",
                _ => "th",
            };
            format!("{}{}", n, suffix)
        }
    }
}

/// Feedback issued instead of a model grade when a resubmission reproduces
/// the previous round's suggested revision. Every category drops to zero.
pub fn penalty_feedback(previous: &CategoryScoreSet, submission_number: u32) -> String {
    let analysis = format!(
        "This {} submission was identified as a copy of the revision from the previous feedback. \
         Submitting work that is not your own does not demonstrate learning or effort.",
        ordinal(submission_number)
    );

    let mut html = String::new();
    for (index, category) in Category::ALL.into_iter().enumerate() {
        let max = category.max();
        html.push_str(&format!(
            "<h2 style=\"font-size:18px;\">{}. {} ({}%)</h2>\n",
            index + 1,
            category.title(),
            max
        ));
        html.push_str(&format!(
            "<p><strong>Score (Previous {arrow} New):</strong> {prev}/{max} {arrow} 0/{max}</p>\n",
            arrow = ARROW,
            prev = previous.get(category),
            max = max
        ));
        html.push_str(&format!(
            "<ul>\n<li><strong>Analysis of Changes:</strong> {}</li>\n",
            analysis
        ));
        html.push_str(
            "<li><strong>Areas for Improvement:</strong><ul><li>Please revise the essay using your own ideas and words, \
             incorporating the feedback provided. Focus on genuine improvement rather than copying.</li></ul></li>\n</ul>\n\n",
        );
    }

    html.push_str("<h2 style=\"font-size:18px;\">Overall Comments</h2>\n");
    html.push_str(&format!(
        "<div id=\"overall-comments\"><p>{} Your next submission will be graded normally against your earlier feedback.</p></div>\n\n",
        analysis
    ));
    html.push_str(&format!(
        "<h2 style=\"font-size:16px;\"><p><strong>Final Score (Previous {arrow} New): {prev}/{max} {arrow} 0/{max}</strong></p></h2>\n",
        arrow = ARROW,
        prev = previous.total(),
        max = MAX_TOTAL
    ));
    html
}
