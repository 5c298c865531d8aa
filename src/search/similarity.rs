//! Per-modality similarity and the weighted blend.

use crate::photos::ImageRecord;
use serde::{Deserialize, Serialize};

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being",
    "in", "on", "at", "to", "for", "of", "with", "by", "from", "as",
    "and", "or", "but", "not", "no", "so", "if", "then",
];

/// Cosine similarity in [-1, 1].
///
/// `None` for malformed input (empty or different lengths). A zero vector
/// has no direction and scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    // f64 accumulation keeps squares of extreme f32 components finite and non-zero
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }

    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    if cos.is_nan() {
        return Some(0.0);
    }
    Some(cos.clamp(-1.0, 1.0) as f32)
}

/// Lowercase alphanumeric terms, stop words dropped, first occurrence kept.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.chars().count() > 1 && !STOP_WORDS.contains(&s.as_str()))
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Share of the query terms that occur as whole tokens in `text`.
pub fn text_overlap(query_terms: &[String], text: &str) -> f32 {
    if query_terms.is_empty() || text.trim().is_empty() {
        return 0.0;
    }

    let tokens = tokenize(text);
    let found = query_terms.iter().filter(|term| tokens.contains(term)).count();
    found as f32 / query_terms.len() as f32
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("weight {name} must be a number between 0.0 and 1.0, got {value}")]
pub struct InvalidWeight {
    pub name: &'static str,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub ai: f32,
    pub manual: f32,
    pub ocr: f32,
}

impl Weights {
    pub fn validate(&self) -> Result<(), InvalidWeight> {
        for (name, value) in [("ai", self.ai), ("manual", self.manual), ("ocr", self.ocr)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(InvalidWeight { name, value });
            }
        }
        Ok(())
    }
}

/// Weighted sum clamped to [0, 1]. A missing modality contributes 0 and
/// its weight is not handed to the others.
pub fn blend(weights: &Weights, ai: f32, manual: f32, ocr: f32) -> f32 {
    let score = weights.ai * ai + weights.manual * manual + weights.ocr * ocr;
    score.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub ai: f32,
    pub manual: f32,
    pub ocr: f32,
    pub score: f32,
}

/// Scores records against one query. Built once per search.
pub struct Scorer<'q> {
    query_embedding: Option<&'q [f32]>,
    query_terms: Vec<String>,
    weights: Weights,
}

impl<'q> Scorer<'q> {
    pub fn new(query_embedding: Option<&'q [f32]>, query_text: &str, weights: Weights) -> Self {
        Self {
            query_embedding,
            query_terms: tokenize(query_text),
            weights,
        }
    }

    pub fn score(&self, record: &ImageRecord) -> ScoreBreakdown {
        let ai = match (self.query_embedding, record.caption_embedding.as_deref()) {
            (Some(query), Some(caption)) => cosine_similarity(query, caption)
                .unwrap_or_else(|| {
                    log::warn!("image {} has a malformed caption embedding", record.id);
                    0.0
                })
                .max(0.0),
            _ => 0.0,
        };
        let manual = text_overlap(&self.query_terms, &record.label_text());
        let ocr = text_overlap(&self.query_terms, &record.ocr_text);

        ScoreBreakdown {
            ai,
            manual,
            ocr,
            score: blend(&self.weights, ai, manual, ocr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEIGHTS: Weights = Weights {
        ai: 0.4,
        manual: 0.3,
        ocr: 0.3,
    };

    #[test]
    fn test_cosine_bounds() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]), Some(-1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]), Some(0.0));
        // overshoot from float error stays inside the range
        let v = [0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let cos = cosine_similarity(&v, &v).unwrap();
        assert!(cos <= 1.0 && cos > 0.9999);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), Some(0.0));
    }

    #[test]
    fn test_cosine_malformed() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
    }

    #[test]
    fn test_cosine_extreme_magnitudes() {
        for v in [[1e20f32, 1e20], [3e38, -3e38], [1e-25, 1e-25], [1e-40, 2e-40]] {
            let cos = cosine_similarity(&v, &v).unwrap();
            assert!((cos - 1.0).abs() < 1e-6, "{v:?} gave {cos}");
        }
        assert_eq!(cosine_similarity(&[1e30, 0.0], &[0.0, 1e-30]), Some(0.0));
    }

    #[test]
    fn test_cosine_is_symmetric() {
        let a = [0.3, -1.2, 4.0];
        let b = [2.0, 0.5, 1.0];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("The Sunset at the BEACH, sunset!"),
            vec!["sunset", "beach"]
        );
    }

    #[test]
    fn test_text_overlap() {
        let terms = tokenize("sunset beach");
        assert_eq!(text_overlap(&terms, "sunset beach"), 1.0);
        assert_eq!(text_overlap(&terms, "beach volleyball"), 0.5);
        assert_eq!(text_overlap(&terms, "sunsets"), 0.0);
        assert_eq!(text_overlap(&terms, ""), 0.0);
        assert_eq!(text_overlap(&[], "sunset"), 0.0);
    }

    #[test]
    fn test_blend_does_not_redistribute() {
        assert!((blend(&WEIGHTS, 0.9, 0.0, 0.0) - 0.36).abs() < 1e-6);
        assert!((blend(&WEIGHTS, 0.0, 1.0, 0.0) - 0.3).abs() < 1e-6);
        assert_eq!(blend(&WEIGHTS, 1.0, 1.0, 1.0), 1.0);
    }

    #[test]
    fn test_blend_clamps_overweight() {
        let heavy = Weights {
            ai: 1.0,
            manual: 1.0,
            ocr: 1.0,
        };
        assert_eq!(blend(&heavy, 1.0, 1.0, 1.0), 1.0);
    }

    #[test]
    fn test_weights_validate() {
        assert!(WEIGHTS.validate().is_ok());
        let bad = Weights { ai: -0.1, ..WEIGHTS };
        assert_eq!(bad.validate(), Err(InvalidWeight { name: "ai", value: -0.1 }));
        let nan = Weights { ocr: f32::NAN, ..WEIGHTS };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_scorer_absent_modalities() {
        let record = ImageRecord {
            id: 3,
            manual_labels: vec!["sunset".into(), "beach".into()],
            ..Default::default()
        };
        let query = [1.0, 0.0];
        let scorer = Scorer::new(Some(&query[..]), "sunset beach", WEIGHTS);

        let breakdown = scorer.score(&record);
        assert_eq!(breakdown.ai, 0.0);
        assert_eq!(breakdown.manual, 1.0);
        assert_eq!(breakdown.ocr, 0.0);
        assert!((breakdown.score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_record_without_signals_scores_zero() {
        let query = [0.3, 0.7];
        for weights in [WEIGHTS, Weights { ai: 1.0, manual: 0.0, ocr: 0.0 }] {
            let scorer = Scorer::new(Some(&query[..]), "sunset beach", weights);
            assert_eq!(scorer.score(&ImageRecord::default()).score, 0.0);
        }
    }

    #[test]
    fn test_equal_components_blend_to_themselves() {
        for weights in [WEIGHTS, Weights { ai: 0.2, manual: 0.5, ocr: 0.3 }] {
            for s in [0.0, 0.25, 0.5, 1.0] {
                assert!((blend(&weights, s, s, s) - s).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_scorer_floors_negative_cosine() {
        let record = ImageRecord {
            id: 1,
            caption_embedding: Some(vec![-1.0, 0.0]),
            ..Default::default()
        };
        let query = [1.0, 0.0];
        let scorer = Scorer::new(Some(&query[..]), "anything", WEIGHTS);
        assert_eq!(scorer.score(&record).ai, 0.0);
    }

    #[test]
    fn test_scorer_malformed_embedding_scores_zero() {
        let record = ImageRecord {
            id: 1,
            caption_embedding: Some(vec![1.0, 0.0, 0.0]),
            ..Default::default()
        };
        let query = [1.0, 0.0];
        let scorer = Scorer::new(Some(&query[..]), "anything", WEIGHTS);
        assert_eq!(scorer.score(&record).score, 0.0);
    }
}
