use crate::{
    analytics::{self, CollectionStats},
    config::Config,
    ingest::{Capabilities, Ingestor, Upload, UploadFailure},
    photos::{self, Catalog, ImageRecord, ImageUpdate},
    search::{self, SearchOutcome, SearchRequest, SearchResult, SearchSettings},
    storage::StorageManager,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::errors::AppError;

pub struct AppLocal {
    pub catalog: Arc<dyn Catalog>,
    pub storage_mgr: Arc<dyn StorageManager>,
    ingestor: Ingestor,
    config: Arc<Config>,
}

/// A search outcome plus the records it refers to, in result order.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    #[serde(flatten)]
    pub outcome: SearchOutcome,
    pub images: Vec<ImageRecord>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub uploaded: Vec<ImageRecord>,
    pub failed: Vec<UploadFailure>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LabelUpdate {
    /// Replace all labels
    pub labels: Option<Vec<String>>,
    pub append: Option<Vec<String>>,
    pub remove: Option<Vec<String>>,
}

impl AppLocal {
    pub fn new(
        config: Arc<Config>,
        catalog: Arc<dyn Catalog>,
        storage_mgr: Arc<dyn StorageManager>,
        capabilities: Capabilities,
    ) -> Self {
        let ingestor = Ingestor::new(
            config.processing.clone(),
            capabilities,
            storage_mgr.clone(),
        );

        Self {
            catalog,
            storage_mgr,
            ingestor,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn search(&self, request: SearchRequest) -> Result<SearchPage, AppError> {
        let snapshot = self.catalog.snapshot();
        let settings = SearchSettings::from(&self.config.search);
        let embedder = self.ingestor.capabilities().embedder.as_ref();

        let outcome = search::search(&snapshot, &request, embedder, &settings)?;
        let images = records_for(
            &snapshot,
            outcome.results.iter().chain(&outcome.below_threshold),
        );

        Ok(SearchPage { outcome, images })
    }

    pub fn similar(&self, id: u64, limit: usize) -> Result<Vec<(SearchResult, ImageRecord)>, AppError> {
        let snapshot = self.catalog.snapshot();
        let results = search::similar(&snapshot, id, limit)?;
        let images = records_for(&snapshot, &results);

        Ok(results.into_iter().zip(images).collect())
    }

    pub fn upload(&self, uploads: &[Upload], labels: &[String]) -> Result<UploadReport, AppError> {
        self.upload_with_progress(uploads, labels, &|_| {})
    }

    /// Process uploads in batches of `batch_size`, persisting after each
    /// batch. One bad file doesn't fail the others.
    pub fn upload_with_progress(
        &self,
        uploads: &[Upload],
        labels: &[String],
        on_done: &(dyn Fn(&str) + Sync),
    ) -> Result<UploadReport, AppError> {
        if uploads.is_empty() {
            return Err(AppError::BadRequest("no files to upload".to_string()));
        }

        let labels = photos::normalize_labels(labels);
        let mut report = UploadReport::default();

        for batch in uploads.chunks(self.config.processing.batch_size.max(1)) {
            let mut creates = vec![];
            for (upload, result) in batch
                .iter()
                .zip(self.ingestor.process_batch(batch, &labels, on_done))
            {
                match result {
                    Ok(create) => creates.push(create),
                    Err(err) => report.failed.push(UploadFailure {
                        file_name: upload.file_name.clone(),
                        error: err.to_string(),
                    }),
                }
            }

            if creates.is_empty() {
                continue;
            }

            let blobs: Vec<(String, Vec<String>)> = creates
                .iter()
                .map(|create| {
                    let files = std::iter::once(create.blob_id.clone())
                        .chain(create.analysis.thumbnail_id.clone())
                        .collect();
                    (create.file_name.clone(), files)
                })
                .collect();

            match self.catalog.create_many(creates) {
                Ok(created) => report.uploaded.extend(created),
                Err(err) => {
                    log::error!("couldn't save {} uploaded images: {err:#}", blobs.len());
                    for (file_name, files) in blobs {
                        self.discard_blobs(&files);
                        report.failed.push(UploadFailure {
                            file_name,
                            error: format!("{err:#}"),
                        });
                    }
                }
            }
        }

        log::info!(
            "uploaded {} images, {} failed",
            report.uploaded.len(),
            report.failed.len()
        );

        Ok(report)
    }

    pub fn get(&self, id: u64) -> Result<ImageRecord, AppError> {
        self.catalog.get(id).ok_or(AppError::NotFound(id))
    }

    /// Newest uploads first.
    pub fn list(&self, limit: Option<usize>, offset: usize) -> Vec<ImageRecord> {
        let snapshot = self.catalog.snapshot();
        let mut records: Vec<&ImageRecord> = snapshot.iter().collect();
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then_with(|| b.id.cmp(&a.id)));

        records
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn total(&self) -> usize {
        self.catalog.total()
    }

    /// Remove the record and its stored files.
    pub fn delete(&self, id: u64) -> Result<ImageRecord, AppError> {
        let record = self.catalog.delete(id)?.ok_or(AppError::NotFound(id))?;

        for blob in std::iter::once(&record.blob_id).chain(record.thumbnail_id.as_ref()) {
            if let Err(err) = self.storage_mgr.delete(blob) {
                log::warn!("couldn't delete {blob} of image {id}: {err}");
            }
        }

        Ok(record)
    }

    pub fn update_labels(&self, id: u64, update: LabelUpdate) -> Result<ImageRecord, AppError> {
        let update = ImageUpdate {
            manual_labels: update.labels,
            append_labels: update.append,
            remove_labels: update.remove,
            analysis: None,
        };
        if update.is_noop() {
            return Err(AppError::BadRequest("label update does nothing".to_string()));
        }

        self.catalog.update(id, update)?.ok_or(AppError::NotFound(id))
    }

    /// Re-run captioning, OCR, embedding and EXIF on the stored original.
    pub fn reprocess(&self, id: u64) -> Result<ImageRecord, AppError> {
        let record = self.get(id)?;
        let bytes = self.storage_mgr.read(&record.blob_id)?;
        let analysis = self.ingestor.analyze(&bytes)?;

        let new_thumbnail = analysis.thumbnail_id.clone();
        let update = ImageUpdate {
            analysis: Some(analysis),
            ..Default::default()
        };
        let updated = match self.catalog.update(id, update) {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                self.discard_blobs(new_thumbnail.as_slice());
                return Err(AppError::NotFound(id));
            }
            Err(err) => {
                self.discard_blobs(new_thumbnail.as_slice());
                return Err(err.into());
            }
        };

        if let (Some(old), Some(_)) = (&record.thumbnail_id, &new_thumbnail) {
            if let Err(err) = self.storage_mgr.delete(old) {
                log::warn!("couldn't delete old thumbnail {old}: {err}");
            }
        }

        Ok(updated)
    }

    /// Remove blobs that never made it into the catalog.
    fn discard_blobs(&self, blobs: &[String]) {
        for blob in blobs {
            if let Err(err) = self.storage_mgr.delete(blob) {
                log::warn!("couldn't delete unsaved file {blob}: {err}");
            }
        }
    }

    pub fn stats(&self) -> CollectionStats {
        CollectionStats::from_records(&self.catalog.snapshot())
    }

    pub fn recent(&self, days: u32) -> Vec<ImageRecord> {
        let snapshot = self.catalog.snapshot();
        analytics::recent_uploads(&snapshot, days, Utc::now())
            .into_iter()
            .cloned()
            .collect()
    }
}

fn records_for<'a>(
    snapshot: &[ImageRecord],
    results: impl IntoIterator<Item = &'a SearchResult>,
) -> Vec<ImageRecord> {
    results
        .into_iter()
        .filter_map(|result| snapshot.iter().find(|r| r.id == result.id).cloned())
        .collect()
}
