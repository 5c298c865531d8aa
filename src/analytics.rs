//! Collection statistics.

use crate::photos::ImageRecord;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const TOP_TERMS: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NumericSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl NumericSummary {
    fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut summary = NumericSummary {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
        };
        let mut sum = 0.0;
        for value in values {
            summary.count += 1;
            summary.min = summary.min.min(value);
            summary.max = summary.max.max(value);
            sum += value;
        }

        if summary.count == 0 {
            return None;
        }
        summary.mean = sum / summary.count as f64;
        Some(summary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermCount {
    pub term: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionStats {
    pub total_images: usize,
    pub total_size: u64,
    pub total_size_display: String,
    pub format_distribution: BTreeMap<String, usize>,
    /// "Make Model" -> count, only for images with both
    pub camera_distribution: BTreeMap<String, usize>,
    pub resolution_distribution: BTreeMap<String, usize>,
    pub aspect_ratio_distribution: BTreeMap<String, usize>,
    pub images_with_gps: usize,
    pub images_with_ocr: usize,
    pub images_with_embedding: usize,
    pub top_labels: Vec<TermCount>,
    pub top_keywords: Vec<TermCount>,
    pub uploads_per_day: BTreeMap<NaiveDate, usize>,
    pub iso: Option<NumericSummary>,
    pub aperture: Option<NumericSummary>,
    pub focal_length: Option<NumericSummary>,
    pub megapixels: Option<NumericSummary>,
}

impl CollectionStats {
    pub fn from_records(records: &[ImageRecord]) -> Self {
        let mut stats = CollectionStats {
            total_images: records.len(),
            ..Default::default()
        };

        let mut labels: HashMap<&str, usize> = HashMap::new();
        let mut keywords: HashMap<&str, usize> = HashMap::new();

        for record in records {
            stats.total_size += record.file_size;

            let format = record.format.clone().unwrap_or_else(|| "Unknown".to_string());
            *stats.format_distribution.entry(format).or_default() += 1;

            if let (Some(make), Some(model)) = (&record.exif.camera_make, &record.exif.camera_model) {
                *stats
                    .camera_distribution
                    .entry(format!("{make} {model}"))
                    .or_default() += 1;
            }

            *stats
                .resolution_distribution
                .entry(record.resolution_category().to_string())
                .or_default() += 1;

            if let Some(ratio) = record.aspect_ratio() {
                *stats.aspect_ratio_distribution.entry(ratio).or_default() += 1;
            }

            stats.images_with_gps += record.has_gps() as usize;
            stats.images_with_ocr += record.has_ocr_text() as usize;
            stats.images_with_embedding += record.caption_embedding.is_some() as usize;

            for label in &record.manual_labels {
                *labels.entry(label.as_str()).or_default() += 1;
            }
            for keyword in &record.ai_keywords {
                *keywords.entry(keyword.as_str()).or_default() += 1;
            }

            *stats
                .uploads_per_day
                .entry(record.uploaded_at.date_naive())
                .or_default() += 1;
        }

        stats.total_size_display = format_file_size(stats.total_size);
        stats.top_labels = top_terms(labels);
        stats.top_keywords = top_terms(keywords);

        stats.iso = NumericSummary::from_values(records.iter().filter_map(|r| r.exif.iso).map(f64::from));
        stats.aperture =
            NumericSummary::from_values(records.iter().filter_map(|r| r.exif.aperture).map(f64::from));
        stats.focal_length = NumericSummary::from_values(
            records.iter().filter_map(|r| r.exif.focal_length).map(f64::from),
        );
        stats.megapixels = NumericSummary::from_values(records.iter().filter_map(|r| r.megapixels()));

        stats
    }
}

fn top_terms(counts: HashMap<&str, usize>) -> Vec<TermCount> {
    let mut terms: Vec<TermCount> = counts
        .into_iter()
        .map(|(term, count)| TermCount {
            term: term.to_string(),
            count,
        })
        .collect();
    terms.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
    terms.truncate(TOP_TERMS);
    terms
}

/// Images uploaded within the last `days` days, newest first.
pub fn recent_uploads(records: &[ImageRecord], days: u32, now: DateTime<Utc>) -> Vec<&ImageRecord> {
    let since = Duration::try_days(days.into())
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let mut recent: Vec<&ImageRecord> = records.iter().filter(|r| r.uploaded_at >= since).collect();
    recent.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then_with(|| b.id.cmp(&a.id)));
    recent
}

pub fn format_file_size(size_bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if size_bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{size:.1} {}", UNITS[unit])
}
