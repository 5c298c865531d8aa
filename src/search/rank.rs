use super::SearchResult;
use std::cmp::Ordering;

/// Highest score first; ties go to the newest upload, then the higher id.
pub fn order(results: &mut [SearchResult]) {
    results.sort_by(compare);
}

fn compare(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.uploaded_at.cmp(&a.uploaded_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// Ordered results split into those at or above `threshold` and the rest.
pub fn split_at_threshold(
    mut results: Vec<SearchResult>,
    threshold: f32,
) -> (Vec<SearchResult>, Vec<SearchResult>) {
    order(&mut results);
    let cut = results.partition_point(|r| r.score >= threshold);
    let below = results.split_off(cut);
    (results, below)
}

/// Results scoring at least `threshold`, best first. May be empty.
pub fn rank(results: Vec<SearchResult>, threshold: f32) -> Vec<SearchResult> {
    split_at_threshold(results, threshold).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn result(id: u64, score: f32, day: u32) -> SearchResult {
        SearchResult {
            id,
            score,
            uploaded_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            ..Default::default()
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<u64> {
        results.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let results = vec![result(1, 0.5, 1), result(2, 0.49, 1), result(3, 0.7, 1)];
        assert_eq!(ids(&rank(results, 0.5)), vec![3, 1]);
    }

    #[test]
    fn test_ties_prefer_recent_uploads() {
        let results = vec![result(1, 0.8, 1), result(2, 0.8, 9), result(3, 0.8, 5)];
        assert_eq!(ids(&rank(results, 0.0)), vec![2, 3, 1]);
    }

    #[test]
    fn test_full_ties_are_deterministic() {
        let results = vec![result(4, 0.8, 1), result(7, 0.8, 1)];
        assert_eq!(ids(&rank(results, 0.0)), vec![7, 4]);
    }

    #[test]
    fn test_nothing_passes() {
        let results = vec![result(1, 0.2, 1), result(2, 0.1, 1)];
        let (passing, below) = split_at_threshold(results, 0.9);
        assert!(passing.is_empty());
        assert_eq!(ids(&below), vec![1, 2]);
    }

    #[test]
    fn test_raising_threshold_gives_subset() {
        let results = vec![result(1, 0.9, 1), result(2, 0.6, 2), result(3, 0.3, 3)];
        let low = ids(&rank(results.clone(), 0.3));
        let high = ids(&rank(results, 0.6));
        assert!(high.iter().all(|id| low.contains(id)));
        assert_eq!(high, vec![1, 2]);
    }
}
