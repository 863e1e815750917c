use similar::TextDiff;

use crate::textutil::has_latin_letters;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;

/// Normalized match ratio in `[0, 1]`: twice the number of matched characters
/// over the combined length. Two empty strings score 1.0.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f32 {
    TextDiff::from_chars(a, b).ratio()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Verdict {
    /// Source has no Latin letters; taken as-is without scoring.
    Exempt,
    Accepted { ratio: f32 },
    TooSimilar { ratio: f32 },
}

impl Verdict {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Verdict::TooSimilar { .. })
    }

    #[must_use]
    pub fn ratio(&self) -> Option<f32> {
        match self {
            Verdict::Exempt => None,
            Verdict::Accepted { ratio } | Verdict::TooSimilar { ratio } => Some(*ratio),
        }
    }
}

/// Flags candidate translations that are (nearly) an echo of the source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityJudge {
    threshold: f32,
}

impl Default for SimilarityJudge {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl SimilarityJudge {
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        let threshold = if threshold.is_nan() {
            DEFAULT_SIMILARITY_THRESHOLD
        } else {
            threshold.clamp(0.0, 1.0)
        };
        Self { threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    #[must_use]
    pub fn is_too_similar(&self, source: &str, candidate: &str) -> bool {
        similarity(source, candidate) >= self.threshold
    }

    #[must_use]
    pub fn judge(&self, source: &str, candidate: &str) -> Verdict {
        if !has_latin_letters(source) {
            return Verdict::Exempt;
        }
        let ratio = similarity(source, candidate);
        if ratio >= self.threshold {
            Verdict::TooSimilar { ratio }
        } else {
            Verdict::Accepted { ratio }
        }
    }
}
