//! Structured metadata predicates that narrow the candidate set before
//! scoring. All predicates are combined with AND.

use crate::photos::ImageRecord;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("{field}: min ({min}) is greater than max ({max})")]
    InvertedRange {
        field: &'static str,
        min: String,
        max: String,
    },

    #[error("{0}: bound is not a finite number")]
    NotFinite(&'static str),

    #[error("{0}: value must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateField {
    /// EXIF capture date
    #[default]
    Taken,
    Uploaded,
}

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub field: DateField,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    fn contains(&self, at: NaiveDateTime) -> bool {
        let day = at.date();
        self.from.map_or(true, |from| day >= from) && self.to.map_or(true, |to| day <= to)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Exact,
    Prefix,
}

/// Case-insensitive exact or prefix match. Never a substring match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMatch {
    pub value: String,
    #[serde(default)]
    pub mode: MatchMode,
}

impl TextMatch {
    pub fn exact(value: &str) -> Self {
        Self {
            value: value.to_string(),
            mode: MatchMode::Exact,
        }
    }

    pub fn prefix(value: &str) -> Self {
        Self {
            value: value.to_string(),
            mode: MatchMode::Prefix,
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        let wanted = self.value.trim().to_lowercase();
        let candidate = candidate.trim().to_lowercase();
        match self.mode {
            MatchMode::Exact => candidate == wanted,
            MatchMode::Prefix => candidate.starts_with(&wanted),
        }
    }
}

/// Inclusive numeric range; a missing bound is open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumRange<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T> Default for NumRange<T> {
    fn default() -> Self {
        Self {
            min: None,
            max: None,
        }
    }
}

impl<T: Copy + PartialOrd + std::fmt::Display> NumRange<T> {
    pub fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: T) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    fn validate(&self, field: &'static str) -> Result<(), FilterError> {
        // NaN never compares equal to itself
        for bound in [self.min, self.max].into_iter().flatten() {
            if bound.partial_cmp(&bound).is_none() {
                return Err(FilterError::NotFinite(field));
            }
        }

        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(FilterError::InvertedRange {
                    field,
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub date: Option<DateRange>,
    pub camera_make: Option<TextMatch>,
    pub camera_model: Option<TextMatch>,
    pub iso: Option<NumRange<u32>>,
    pub aperture: Option<NumRange<f32>>,
    pub focal_length: Option<NumRange<f32>>,
    pub width: Option<NumRange<u32>>,
    pub height: Option<NumRange<u32>>,
    /// Accepted formats, e.g. `["JPEG", "PNG"]`
    pub formats: Option<Vec<String>>,
    /// Each entry must be a substring of some manual label
    pub labels: Option<Vec<String>>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        *self == Filters::default()
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if let Some(date) = &self.date {
            if let (Some(from), Some(to)) = (date.from, date.to) {
                if from > to {
                    return Err(FilterError::InvertedRange {
                        field: "date",
                        min: from.to_string(),
                        max: to.to_string(),
                    });
                }
            }
        }

        for (field, text) in [
            ("camera_make", &self.camera_make),
            ("camera_model", &self.camera_model),
        ] {
            if text.as_ref().is_some_and(|t| t.value.trim().is_empty()) {
                return Err(FilterError::Empty(field));
            }
        }

        for (field, range) in [("iso", &self.iso), ("width", &self.width), ("height", &self.height)] {
            if let Some(range) = range {
                range.validate(field)?;
            }
        }
        for (field, range) in [("aperture", &self.aperture), ("focal_length", &self.focal_length)] {
            if let Some(range) = range {
                for bound in [range.min, range.max].into_iter().flatten() {
                    if !bound.is_finite() {
                        return Err(FilterError::NotFinite(field));
                    }
                }
                range.validate(field)?;
            }
        }

        if let Some(formats) = &self.formats {
            if formats.is_empty() || formats.iter().any(|f| f.trim().is_empty()) {
                return Err(FilterError::Empty("formats"));
            }
        }

        if let Some(labels) = &self.labels {
            if labels.iter().any(|l| l.trim().is_empty()) {
                return Err(FilterError::Empty("labels"));
            }
        }

        Ok(())
    }

    /// A record missing a field that a predicate constrains does not match.
    pub fn matches(&self, record: &ImageRecord) -> bool {
        let exif = &record.exif;

        if let Some(date) = &self.date {
            let at = match date.field {
                DateField::Taken => exif.date_taken,
                DateField::Uploaded => Some(record.uploaded_at.naive_utc()),
            };
            if !at.is_some_and(|at| date.contains(at)) {
                return false;
            }
        }

        for (wanted, actual) in [
            (&self.camera_make, &exif.camera_make),
            (&self.camera_model, &exif.camera_model),
        ] {
            if let Some(wanted) = wanted {
                if !actual.as_deref().is_some_and(|actual| wanted.matches(actual)) {
                    return false;
                }
            }
        }

        for (range, value) in [
            (&self.iso, exif.iso),
            (&self.width, record.width),
            (&self.height, record.height),
        ] {
            if let Some(range) = range {
                if !value.is_some_and(|v| range.contains(v)) {
                    return false;
                }
            }
        }

        for (range, value) in [
            (&self.aperture, exif.aperture),
            (&self.focal_length, exif.focal_length),
        ] {
            if let Some(range) = range {
                if !value.is_some_and(|v| range.contains(v)) {
                    return false;
                }
            }
        }

        if let Some(formats) = &self.formats {
            let Some(format) = &record.format else {
                return false;
            };
            if !formats.iter().any(|f| f.trim().eq_ignore_ascii_case(format)) {
                return false;
            }
        }

        if let Some(labels) = &self.labels {
            let found = labels.iter().all(|wanted| {
                let wanted = wanted.trim().to_lowercase();
                record
                    .manual_labels
                    .iter()
                    .any(|label| label.to_lowercase().contains(&wanted))
            });
            if !found {
                return false;
            }
        }

        true
    }

    /// Records that satisfy every predicate, in input order.
    pub fn apply<'a>(&self, records: &'a [ImageRecord]) -> Vec<&'a ImageRecord> {
        records.iter().filter(|record| self.matches(record)).collect()
    }
}
