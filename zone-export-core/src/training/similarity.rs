//! Text similarity used for near-duplicate detection

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Scores two texts in `[0, 1]`, 1 meaning identical
pub trait SimilarityMetric: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;

    fn name(&self) -> &'static str;
}

/// Selects a built-in metric from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SimilarityKind {
    #[default]
    TokenJaccard,
    CharTrigram,
}

impl SimilarityKind {
    pub fn metric(&self) -> Box<dyn SimilarityMetric> {
        match self {
            SimilarityKind::TokenJaccard => Box::new(TokenJaccard),
            SimilarityKind::CharTrigram => Box::new(CharTrigram),
        }
    }
}

/// Jaccard index over lowercase alphanumeric word sets
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenJaccard;

impl SimilarityMetric for TokenJaccard {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        jaccard(&tokens(a), &tokens(b))
    }

    fn name(&self) -> &'static str {
        "token_jaccard"
    }
}

/// Jaccard index over character trigrams, tolerant of small edits
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTrigram;

impl SimilarityMetric for CharTrigram {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        jaccard(&trigrams(a), &trigrams(b))
    }

    fn name(&self) -> &'static str {
        "char_trigram"
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn trigrams(text: &str) -> HashSet<String> {
    let chars: Vec<char> = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .collect();

    if chars.len() < 3 {
        return std::iter::once(chars.iter().collect::<String>())
            .filter(|s| !s.is_empty())
            .collect();
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}
