use crate::{
    app::{AppLocal, LabelUpdate},
    ingest::Upload,
    photos,
    search::{DateField, DateRange, Filters, NumRange, SearchRequest, TextMatch, Weights},
};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;

use super::{FilterArgs, ScoringArgs};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn range<T: Copy + PartialOrd + std::fmt::Display>(min: Option<T>, max: Option<T>) -> Option<NumRange<T>> {
    if min.is_none() && max.is_none() {
        None
    } else {
        Some(NumRange::new(min, max))
    }
}

impl FilterArgs {
    pub fn into_filters(self) -> Filters {
        let text_match = |value: String| {
            if self.prefix {
                TextMatch::prefix(&value)
            } else {
                TextMatch::exact(&value)
            }
        };

        let date = if self.from.is_some() || self.to.is_some() {
            Some(DateRange {
                field: if self.by_upload {
                    DateField::Uploaded
                } else {
                    DateField::Taken
                },
                from: self.from,
                to: self.to,
            })
        } else {
            None
        };

        Filters {
            date,
            camera_make: self.make.clone().map(text_match),
            camera_model: self.model.clone().map(text_match),
            iso: range(self.iso_min, self.iso_max),
            aperture: range(self.aperture_min, self.aperture_max),
            focal_length: range(self.focal_min, self.focal_max),
            width: range(self.width_min, self.width_max),
            height: range(self.height_min, self.height_max),
            formats: self.formats.as_deref().map(photos::parse_labels),
            labels: self.labels.as_deref().map(photos::parse_labels),
        }
    }
}

pub fn handle_search(
    query: Option<String>,
    filters: FilterArgs,
    scoring: ScoringArgs,
    count: bool,
    app: &AppLocal,
) -> Result<()> {
    // partial weight overrides fall back to configured values
    let weights = if scoring.ai_weight.is_some()
        || scoring.manual_weight.is_some()
        || scoring.ocr_weight.is_some()
    {
        let search = &app.config().search;
        Some(Weights {
            ai: scoring.ai_weight.unwrap_or(search.ai_weight),
            manual: scoring.manual_weight.unwrap_or(search.manual_weight),
            ocr: scoring.ocr_weight.unwrap_or(search.ocr_weight),
        })
    } else {
        None
    };

    let request = SearchRequest {
        query: query.unwrap_or_default(),
        filters: filters.into_filters(),
        weights,
        threshold: scoring.threshold,
        limit: scoring.limit,
    };

    let page = app.search(request)?;

    if count {
        println!("{} images found", page.outcome.results.len());
        return Ok(());
    }

    if page.outcome.degraded {
        log::warn!("query couldn't be embedded, results use labels and ocr text only");
    }

    print_json(&page)
}

pub fn handle_add(files: Vec<PathBuf>, labels: Option<String>, app: &AppLocal) -> Result<()> {
    let uploads = files
        .iter()
        .map(|path| -> Result<Upload> {
            let bytes =
                std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            Ok(Upload { file_name, bytes })
        })
        .collect::<Result<Vec<_>>>()?;

    let labels = labels
        .as_deref()
        .map(photos::parse_labels)
        .unwrap_or_default();

    let bar = ProgressBar::new(uploads.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
        bar.set_style(style);
    }

    let report = app.upload_with_progress(&uploads, &labels, &|file_name| {
        bar.set_message(file_name.to_string());
        bar.inc(1);
    })?;
    bar.finish_and_clear();

    print_json(&report)
}

pub fn handle_label(
    id: u64,
    set: Option<String>,
    append: Option<String>,
    remove: Option<String>,
    app: &AppLocal,
) -> Result<()> {
    let update = LabelUpdate {
        labels: set.as_deref().map(photos::parse_labels),
        append: append.as_deref().map(photos::parse_labels),
        remove: remove.as_deref().map(photos::parse_labels),
    };

    print_json(&app.update_labels(id, update)?)
}

pub fn handle_delete(ids: Vec<u64>, yes: bool, app: &AppLocal) -> Result<()> {
    let records = ids
        .iter()
        .map(|id| app.get(*id))
        .collect::<Result<Vec<_>, _>>()?;

    if !yes {
        let names: Vec<&str> = records.iter().map(|r| r.file_name.as_str()).collect();
        match inquire::prompt_confirmation(format!(
            "delete {} images ({})? [y/n]",
            records.len(),
            names.join(", ")
        )) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }

    for record in records {
        app.delete(record.id)?;
        println!("deleted {} ({})", record.id, record.file_name);
    }

    Ok(())
}

pub fn handle_reprocess(ids: Vec<u64>, app: &AppLocal) -> Result<()> {
    let bar = ProgressBar::new(ids.len() as u64);
    let mut updated = vec![];
    for id in ids {
        updated.push(app.reprocess(id)?);
        bar.inc(1);
    }
    bar.finish_and_clear();

    print_json(&updated)
}

pub fn handle_show(id: u64, app: &AppLocal) -> Result<()> {
    print_json(&app.get(id)?)
}

pub fn handle_list(limit: Option<usize>, offset: usize, app: &AppLocal) -> Result<()> {
    print_json(&app.list(limit, offset))
}

pub fn handle_similar(id: u64, limit: usize, app: &AppLocal) -> Result<()> {
    let hits: Vec<_> = app
        .similar(id, limit)?
        .into_iter()
        .map(|(result, image)| {
            serde_json::json!({
                "id": result.id,
                "score": result.score,
                "file_name": image.file_name,
                "short_caption": image.short_caption,
            })
        })
        .collect();

    print_json(&hits)
}

pub fn handle_stats(app: &AppLocal) -> Result<()> {
    print_json(&app.stats())
}

pub fn handle_recent(days: u32, app: &AppLocal) -> Result<()> {
    print_json(&app.recent(days))
}
