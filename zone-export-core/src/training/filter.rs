//! Post-extraction quality filtering

use super::similarity::SimilarityMetric;
use super::TrainingExample;
use crate::config::ExportConfig;
use serde::Serialize;

/// Why an example was dropped
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    TooShort { length: usize, minimum: usize },
    LowQuality { score: f64, threshold: f64 },
    Unbalanced { ratio: f64, minimum: f64 },
    NearDuplicate { kept_id: String, similarity: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedExample {
    pub example_id: String,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub kept: Vec<TrainingExample>,
    pub rejected: Vec<RejectedExample>,
}

/// Length, quality, balance and diversity filters applied in that order
pub struct QualityFilter {
    /// Minimum characters across prompt and response
    pub min_length: usize,
    pub quality_threshold: f64,
    /// Response length must be at least this fraction of the prompt length
    pub balance_ratio: f64,
    /// Prompts at or above this similarity are near-duplicates
    pub diversity_score: f64,
    metric: Box<dyn SimilarityMetric>,
}

impl QualityFilter {
    pub fn new(
        min_length: usize,
        quality_threshold: f64,
        balance_ratio: f64,
        diversity_score: f64,
        metric: Box<dyn SimilarityMetric>,
    ) -> Self {
        Self {
            min_length,
            quality_threshold,
            balance_ratio,
            diversity_score,
            metric,
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(
            config.min_length,
            config.quality_threshold,
            config.balance_ratio,
            config.diversity_score,
            config.similarity_metric.metric(),
        )
    }

    pub fn with_metric(mut self, metric: Box<dyn SimilarityMetric>) -> Self {
        self.metric = metric;
        self
    }

    /// Filter examples; survivors keep their original relative order
    pub fn apply(&self, examples: Vec<TrainingExample>) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        let mut candidates: Vec<(usize, TrainingExample, String)> = Vec::new();

        for (idx, example) in examples.into_iter().enumerate() {
            match self.check(&example) {
                Some(reason) => outcome.rejected.push(RejectedExample {
                    example_id: example.id.clone(),
                    reason,
                }),
                None => {
                    let prompt = example.prompt();
                    candidates.push((idx, example, prompt));
                }
            }
        }

        // Highest quality first so the best of each duplicate group survives
        candidates.sort_by(|a, b| b.1.quality.total_cmp(&a.1.quality).then(a.0.cmp(&b.0)));

        let mut kept: Vec<(usize, TrainingExample, String)> = Vec::new();
        for (idx, example, prompt) in candidates {
            let duplicate = kept
                .iter()
                .map(|(_, k, k_prompt)| (k.id.clone(), self.metric.similarity(&prompt, k_prompt)))
                .find(|(_, similarity)| *similarity >= self.diversity_score);

            match duplicate {
                Some((kept_id, similarity)) => outcome.rejected.push(RejectedExample {
                    example_id: example.id.clone(),
                    reason: RejectionReason::NearDuplicate {
                        kept_id,
                        similarity,
                    },
                }),
                None => kept.push((idx, example, prompt)),
            }
        }

        kept.sort_by_key(|(idx, _, _)| *idx);
        outcome.kept = kept.into_iter().map(|(_, example, _)| example).collect();

        tracing::debug!(
            kept = outcome.kept.len(),
            rejected = outcome.rejected.len(),
            metric = self.metric.name(),
            "training examples filtered"
        );
        outcome
    }

    fn check(&self, example: &TrainingExample) -> Option<RejectionReason> {
        let prompt_len = example.prompt().chars().count();
        let response_len = example.response().chars().count();

        let length = prompt_len + response_len;
        if length < self.min_length {
            return Some(RejectionReason::TooShort {
                length,
                minimum: self.min_length,
            });
        }

        if example.quality < self.quality_threshold {
            return Some(RejectionReason::LowQuality {
                score: example.quality,
                threshold: self.quality_threshold,
            });
        }

        let ratio = if prompt_len == 0 {
            f64::INFINITY
        } else {
            response_len as f64 / prompt_len as f64
        };
        if ratio < self.balance_ratio {
            return Some(RejectionReason::Unbalanced {
                ratio,
                minimum: self.balance_ratio,
            });
        }

        None
    }
}
