//! Multi-modal image search.
//!
//! A request runs against one catalog snapshot:
//! candidate filter -> similarity scorer -> ranker.
//!
//! - `filter`: structured metadata predicates
//! - `similarity`: cosine, text overlap and the weighted blend
//! - `rank`: threshold cut and ordering

pub mod filter;
pub mod rank;
pub mod similarity;

use crate::config::SearchConfig;
use crate::photos::ImageRecord;
use crate::semantic::{Embedder, EmbeddingError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use filter::{DateField, DateRange, FilterError, Filters, MatchMode, NumRange, TextMatch};
pub use similarity::{InvalidWeight, ScoreBreakdown, Scorer, Weights};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid filter: {0}")]
    Validation(#[from] FilterError),

    #[error("invalid weights: {0}")]
    InvalidWeights(#[from] InvalidWeight),

    #[error("threshold must be between 0.0 and 1.0, got {0}")]
    InvalidThreshold(f32),

    #[error("limit must be greater than 0")]
    InvalidLimit,

    #[error("query embedding unavailable: {0}")]
    EmbeddingUnavailable(#[source] EmbeddingError),

    #[error("image {0} not found")]
    NotFound(u64),
}

/// Search defaults taken from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub weights: Weights,
    pub threshold: f32,
    pub limit: usize,
    /// Max results returned from under the threshold
    pub preview: usize,
    /// Fail instead of degrading when the query can't be embedded
    pub require_embedding: bool,
}

impl From<&SearchConfig> for SearchSettings {
    fn from(config: &SearchConfig) -> Self {
        Self {
            weights: Weights {
                ai: config.ai_weight,
                manual: config.manual_weight,
                ocr: config.ocr_weight,
            },
            threshold: config.similarity_threshold,
            limit: config.result_limit,
            preview: config.below_threshold_preview,
            require_embedding: config.require_embedding,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    /// Free text; empty lists filtered images newest first
    pub query: String,
    pub filters: Filters,
    pub weights: Option<Weights>,
    pub threshold: Option<f32>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: u64,
    pub score: f32,
    pub ai: f32,
    pub manual: f32,
    pub ocr: f32,
    pub uploaded_at: DateTime<Utc>,
}

impl SearchResult {
    fn new(record: &ImageRecord, breakdown: ScoreBreakdown) -> Self {
        Self {
            id: record.id,
            score: breakdown.score,
            ai: breakdown.ai,
            manual: breakdown.manual,
            ocr: breakdown.ocr,
            uploaded_at: record.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub results: Vec<SearchResult>,
    /// Best results that missed the threshold
    pub below_threshold: Vec<SearchResult>,
    /// Images that passed the filters
    pub total_candidates: usize,
    /// `None` when no scoring took place
    pub threshold: Option<f32>,
    /// Set when scoring ran without the AI signal
    pub degraded: bool,
}

/// Run one search over `snapshot`. Read-only.
pub fn search(
    snapshot: &[ImageRecord],
    request: &SearchRequest,
    embedder: &dyn Embedder,
    settings: &SearchSettings,
) -> Result<SearchOutcome, SearchError> {
    request.filters.validate()?;

    let weights = request.weights.unwrap_or(settings.weights);
    weights.validate()?;

    let threshold = request.threshold.unwrap_or(settings.threshold);
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(SearchError::InvalidThreshold(threshold));
    }

    let limit = request.limit.unwrap_or(settings.limit);
    if limit == 0 {
        return Err(SearchError::InvalidLimit);
    }

    let candidates: Vec<&ImageRecord> = if request.filters.is_empty() {
        snapshot.iter().collect()
    } else {
        request.filters.apply(snapshot)
    };
    let query = request.query.trim();

    if query.is_empty() {
        let mut results: Vec<SearchResult> = candidates
            .iter()
            .map(|record| SearchResult::new(record, ScoreBreakdown::default()))
            .collect();
        rank::order(&mut results);
        results.truncate(limit);

        return Ok(SearchOutcome {
            query: String::new(),
            results,
            below_threshold: vec![],
            total_candidates: candidates.len(),
            threshold: None,
            degraded: false,
        });
    }

    let query_embedding = match embedder.embed(query) {
        Ok(embedding) => Some(embedding),
        Err(err) if settings.require_embedding => {
            return Err(SearchError::EmbeddingUnavailable(err));
        }
        Err(err) => {
            log::warn!("query embedding failed, scoring labels and OCR text only: {err}");
            None
        }
    };

    let scorer = Scorer::new(query_embedding.as_deref(), query, weights);
    let scored: Vec<SearchResult> = candidates
        .iter()
        .map(|record| SearchResult::new(record, scorer.score(record)))
        .collect();

    let (mut results, mut below_threshold) = rank::split_at_threshold(scored, threshold);
    results.truncate(limit);
    below_threshold.truncate(settings.preview);

    log::debug!(
        "search {query:?}: {} candidates, {} above {threshold}",
        candidates.len(),
        results.len()
    );

    Ok(SearchOutcome {
        query: query.to_string(),
        results,
        below_threshold,
        total_candidates: candidates.len(),
        threshold: Some(threshold),
        degraded: query_embedding.is_none(),
    })
}

/// Images whose captions are closest to the caption of image `id`.
///
/// Empty when the reference image has no caption embedding.
pub fn similar(
    snapshot: &[ImageRecord],
    id: u64,
    limit: usize,
) -> Result<Vec<SearchResult>, SearchError> {
    let reference = snapshot
        .iter()
        .find(|r| r.id == id)
        .ok_or(SearchError::NotFound(id))?;

    let Some(reference_embedding) = reference.caption_embedding.as_deref() else {
        return Ok(vec![]);
    };

    let results: Vec<SearchResult> = snapshot
        .iter()
        .filter(|record| record.id != id)
        .filter_map(|record| {
            let embedding = record.caption_embedding.as_deref()?;
            let ai = similarity::cosine_similarity(reference_embedding, embedding)?.max(0.0);
            let breakdown = ScoreBreakdown {
                ai,
                score: ai,
                ..Default::default()
            };
            Some(SearchResult::new(record, breakdown))
        })
        .collect();

    let mut results = rank::rank(results, 0.0);
    results.truncate(limit);
    Ok(results)
}
