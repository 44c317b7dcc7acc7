use serde::{Deserialize, Serialize};

/// Outcome of comparing a resubmission against the previous round's revision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub percent: f64,
    pub is_copy: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SimilarityDetector {
    threshold: f64,
}

impl Default for SimilarityDetector {
    fn default() -> Self {
        Self { threshold: 70.0 }
    }
}

impl SimilarityDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 100.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whitespace-normalizes both texts and scores them with a
    /// longest-common-substring ratio. Empty input on either side scores 0.
    ///
    /// Runs in O(n·m) time over the two texts; async callers should move it
    /// onto a blocking thread.
    pub fn compare(&self, candidate: &str, reference: &str) -> SimilarityResult {
        let a: Vec<char> = normalize_whitespace(candidate).chars().collect();
        let b: Vec<char> = normalize_whitespace(reference).chars().collect();

        if a.is_empty() || b.is_empty() {
            return SimilarityResult {
                percent: 0.0,
                is_copy: false,
            };
        }

        let percent = similarity_percent(&a, &b);
        SimilarityResult {
            percent,
            is_copy: percent >= self.threshold,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn similarity_percent(a: &[char], b: &[char]) -> f64 {
    // Matching is order sensitive on ties, so fix the argument order to make
    // the score symmetric.
    let (first, second) = if (a.len(), a) <= (b.len(), b) {
        (a, b)
    } else {
        (b, a)
    };
    let matched = matched_chars(first, second);
    (200 * matched) as f64 / (a.len() + b.len()) as f64
}

/// Characters covered by the longest common substring plus, recursively,
/// the matches to its left and right.
fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut stack = vec![(a, b)];

    while let Some((left, right)) = stack.pop() {
        let Some((start_a, start_b, len)) = longest_common_substring(left, right) else {
            continue;
        };
        total += len;
        stack.push((&left[..start_a], &right[..start_b]));
        stack.push((&left[start_a + len..], &right[start_b + len..]));
    }

    total
}

/// Earliest longest run shared by `a` and `b`, as (start in a, start in b, length).
fn longest_common_substring(a: &[char], b: &[char]) -> Option<(usize, usize, usize)> {
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];

    for i in 0..a.len() {
        for j in 0..b.len() {
            row[j + 1] = if a[i] == b[j] { prev[j] + 1 } else { 0 };
            if row[j + 1] > best.2 {
                best = (i + 1 - row[j + 1], j + 1 - row[j + 1], row[j + 1]);
            }
        }
        std::mem::swap(&mut prev, &mut row);
    }

    (best.2 > 0).then_some(best)
}
