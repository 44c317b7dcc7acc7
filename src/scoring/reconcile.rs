use serde::{Deserialize, Serialize};
use tracing::warn;

use super::category::{Category, CategoryScoreSet, PartialScores};
use crate::config::RegressionPolicy;
use crate::error::{GradingError, GradingWarning};

/// Validated scores plus everything the reconciler noticed on the way.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub scores: CategoryScoreSet,
    pub missing: Vec<Category>,
    pub claimed_final: Option<i64>,
    pub warnings: Vec<GradingWarning>,
}

impl Reconciliation {
    pub fn low_confidence(&self) -> bool {
        !self.missing.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDelta {
    pub category: Category,
    pub previous: u32,
    pub new: u32,
    pub delta: i64,
}

/// Previous-to-new movement for a resubmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComparison {
    pub previous_total: u32,
    pub new_total: u32,
    pub deltas: Vec<CategoryDelta>,
    pub aggregate_delta: i64,
}

impl ScoreComparison {
    pub fn regressed(&self) -> bool {
        self.aggregate_delta < 0
    }
}

pub struct ScoreReconciler;

impl ScoreReconciler {
    /// Turns whatever the extractor recovered into a complete score set.
    ///
    /// Out-of-range values are clamped into `[0, max]`, absent categories
    /// count as 0 and are reported in `missing`. The final score is always
    /// the sum of the five values; a disagreeing claim from the model is
    /// reported as an invariant violation and otherwise ignored.
    pub fn reconcile(partial: &PartialScores, claimed_final: Option<i64>) -> Reconciliation {
        let mut warnings = Vec::new();
        let mut clamped = PartialScores::new();

        for category in Category::ALL {
            let Some(value) = partial.get(category) else {
                continue;
            };
            let max = i64::from(category.max());
            let bounded = value.clamp(0, max);
            if bounded != value {
                let detail = format!(
                    "{} score {} outside 0..={}, clamped to {}",
                    category.key(),
                    value,
                    max,
                    bounded
                );
                warn!("{}", detail);
                warnings.push(GradingWarning::InvariantViolation { detail });
            }
            clamped.set(category, bounded);
        }

        let missing = partial.missing();
        if !missing.is_empty() {
            warn!(
                "Extraction left {} categories unresolved: {:?}",
                missing.len(),
                missing
            );
            warnings.push(GradingWarning::ExtractionIncomplete {
                missing: missing.clone(),
            });
        }

        // Clamping above guarantees every value is in range.
        let scores = CategoryScoreSet::try_from_partial(&clamped).unwrap_or_else(|_| CategoryScoreSet::zero());

        if let Some(claimed) = claimed_final {
            let total = i64::from(scores.total());
            if claimed != total {
                let detail = format!(
                    "model claimed final score {} but categories sum to {}",
                    claimed, total
                );
                warn!("{}", detail);
                warnings.push(GradingWarning::InvariantViolation { detail });
            }
        }

        Reconciliation {
            scores,
            missing,
            claimed_final,
            warnings,
        }
    }

    pub fn compare(previous: &CategoryScoreSet, new: &CategoryScoreSet) -> ScoreComparison {
        let deltas: Vec<CategoryDelta> = Category::ALL
            .into_iter()
            .map(|category| {
                let before = previous.get(category);
                let after = new.get(category);
                CategoryDelta {
                    category,
                    previous: before,
                    new: after,
                    delta: i64::from(after) - i64::from(before),
                }
            })
            .collect();

        ScoreComparison {
            previous_total: previous.total(),
            new_total: new.total(),
            aggregate_delta: i64::from(new.total()) - i64::from(previous.total()),
            deltas,
        }
    }

    /// Applies the non-regression policy to an ordinary comparative grade.
    /// Scores are never rewritten; advisory mode yields a warning, strict
    /// mode fails the pass.
    pub fn check_regression(
        comparison: &ScoreComparison,
        policy: RegressionPolicy,
    ) -> Result<Option<GradingWarning>, GradingError> {
        if !comparison.regressed() {
            return Ok(None);
        }

        warn!(
            "Comparative grade regressed from {} to {}",
            comparison.previous_total, comparison.new_total
        );

        match policy {
            RegressionPolicy::Advisory => Ok(Some(GradingWarning::ScoreRegression {
                previous: comparison.previous_total,
                new: comparison.new_total,
            })),
            RegressionPolicy::Strict => Err(GradingError::ScoreRegression {
                previous: comparison.previous_total,
                new: comparison.new_total,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(values: [i64; 5]) -> PartialScores {
        let mut partial = PartialScores::new();
        for (category, value) in Category::ALL.into_iter().zip(values) {
            partial.set(category, value);
        }
        partial
    }

    #[test]
    fn final_score_is_the_sum_not_the_claim() {
        let result = ScoreReconciler::reconcile(&full([20, 18, 15, 14, 8]), Some(90));
        assert_eq!(result.scores.total(), 75);
        assert!(result.warnings.iter().any(|w| matches!(
            w,
            GradingWarning::InvariantViolation { detail } if detail.contains("90")
        )));
    }

    #[test]
    fn matching_claim_produces_no_warnings() {
        let result = ScoreReconciler::reconcile(&full([20, 18, 15, 14, 8]), Some(75));
        assert!(result.warnings.is_empty());
        assert!(!result.low_confidence());
    }

    #[test]
    fn missing_categories_count_as_zero_and_lower_confidence() {
        let partial = PartialScores::new()
            .with(Category::Content, 20)
            .with(Category::Structure, 18)
            .with(Category::Language, 15)
            .with(Category::Creativity, 14);
        let result = ScoreReconciler::reconcile(&partial, None);

        assert_eq!(result.missing, vec![Category::Mechanics]);
        assert_eq!(result.scores.get(Category::Mechanics), 0);
        assert_eq!(result.scores.total(), 67);
        assert!(result.low_confidence());
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let result = ScoreReconciler::reconcile(&full([30, -2, 15, 14, 8]), None);
        assert_eq!(result.scores.get(Category::Content), 25);
        assert_eq!(result.scores.get(Category::Structure), 0);
        assert_eq!(
            result
                .warnings
                .iter()
                .filter(|w| matches!(w, GradingWarning::InvariantViolation { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn compare_reports_per_category_deltas() {
        let previous = CategoryScoreSet::new(14, 15, 12, 12, 9).unwrap();
        let new = CategoryScoreSet::new(18, 15, 13, 11, 9).unwrap();
        let cmp = ScoreReconciler::compare(&previous, &new);

        assert_eq!(cmp.previous_total, 62);
        assert_eq!(cmp.new_total, 66);
        assert_eq!(cmp.aggregate_delta, 4);
        assert_eq!(cmp.deltas[0].delta, 4);
        assert_eq!(cmp.deltas[3].delta, -1);
    }

    #[test]
    fn regression_is_flagged_or_rejected_by_policy() {
        let previous = CategoryScoreSet::new(18, 17, 12, 9, 6).unwrap();
        let new = CategoryScoreSet::new(15, 15, 12, 9, 6).unwrap();
        let cmp = ScoreReconciler::compare(&previous, &new);

        let advisory = ScoreReconciler::check_regression(&cmp, RegressionPolicy::Advisory).unwrap();
        assert_eq!(
            advisory,
            Some(GradingWarning::ScoreRegression {
                previous: 62,
                new: 57
            })
        );

        let strict = ScoreReconciler::check_regression(&cmp, RegressionPolicy::Strict);
        assert!(matches!(
            strict,
            Err(GradingError::ScoreRegression {
                previous: 62,
                new: 57
            })
        ));
    }

    #[test]
    fn improvement_passes_either_policy() {
        let previous = CategoryScoreSet::new(10, 10, 10, 10, 5).unwrap();
        let new = CategoryScoreSet::new(12, 10, 10, 10, 5).unwrap();
        let cmp = ScoreReconciler::compare(&previous, &new);
        assert!(ScoreReconciler::check_regression(&cmp, RegressionPolicy::Strict)
            .unwrap()
            .is_none());
    }
}
