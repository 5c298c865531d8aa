//! Upload validation and analysis.
//!
//! Each image is decoded once, then captioned, OCR'd, embedded and
//! thumbnailed. Capability failures degrade to empty values; only invalid
//! uploads and storage errors fail an image.

pub mod analyzer;
pub mod exif;

use crate::config::ProcessingConfig;
use crate::images;
use crate::photos::{Analysis, ImageCreate};
use crate::semantic::{preprocess, Embedder};
use crate::storage::{self, StorageManager};
use analyzer::{Captioner, Captions, TextRecognizer};
use image::DynamicImage;
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

const KEYWORD_MIN_LEN: usize = 3;
const MAX_KEYWORDS: usize = 15;

/// Model handles built once at startup and shared by every request.
#[derive(Clone)]
pub struct Capabilities {
    pub embedder: Arc<dyn Embedder>,
    pub captioner: Option<Arc<dyn Captioner>>,
    pub ocr: Option<Arc<dyn TextRecognizer>>,
}

#[derive(Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Upload {{ file_name: {:?}, bytes: [{} bytes] }}",
            self.file_name,
            self.bytes.len()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{file_name}: unsupported file format, supported: {supported}")]
    UnsupportedFormat { file_name: String, supported: String },

    #[error("file too large ({size}), maximum size: {max}")]
    TooLarge { size: String, max: String },

    #[error("file is empty")]
    Empty,

    #[error("invalid image file or corrupted data: {0}")]
    InvalidImage(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadFailure {
    pub file_name: String,
    pub error: String,
}

/// Checks name, size and that the bytes decode. Returns the decoded image.
pub fn validate_upload(
    upload: &Upload,
    config: &ProcessingConfig,
) -> Result<DynamicImage, UploadError> {
    let extension = Path::new(&upload.file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();

    if !config.supported_formats.contains(&extension) {
        return Err(UploadError::UnsupportedFormat {
            file_name: upload.file_name.clone(),
            supported: config.supported_formats.join(", "),
        });
    }

    if upload.bytes.is_empty() {
        return Err(UploadError::Empty);
    }

    let size = upload.bytes.len() as u64;
    if size > config.max_image_size {
        return Err(UploadError::TooLarge {
            size: crate::analytics::format_file_size(size),
            max: crate::analytics::format_file_size(config.max_image_size),
        });
    }

    images::decode(&upload.bytes).map_err(|err| UploadError::InvalidImage(format!("{err:#}")))
}

pub struct Ingestor {
    config: ProcessingConfig,
    capabilities: Capabilities,
    storage: Arc<dyn StorageManager>,
}

impl Ingestor {
    pub fn new(
        config: ProcessingConfig,
        capabilities: Capabilities,
        storage: Arc<dyn StorageManager>,
    ) -> Self {
        Self {
            config,
            capabilities,
            storage,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Validate, analyze and store one upload.
    pub fn process(&self, upload: &Upload, labels: &[String]) -> Result<ImageCreate, UploadError> {
        let img = validate_upload(upload, &self.config)?;

        let extension = Path::new(&upload.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();
        let blob_id = format!("{}.{extension}", storage::new_blob_id());

        let analysis = self.analyze_decoded(&upload.bytes, &img)?;

        if let Err(err) = self.storage.write(&blob_id, &upload.bytes) {
            if let Some(thumbnail_id) = &analysis.thumbnail_id {
                let _ = self.storage.delete(thumbnail_id);
            }
            return Err(err.into());
        }

        log::info!("processed {} as {blob_id}", upload.file_name);

        Ok(ImageCreate {
            file_name: upload.file_name.clone(),
            file_size: upload.bytes.len() as u64,
            blob_id,
            uploaded_at: None,
            manual_labels: labels.to_vec(),
            analysis,
        })
    }

    /// Process uploads concurrently, at most `max_concurrent_uploads` at a
    /// time. Results come back in input order.
    pub fn process_batch(
        &self,
        uploads: &[Upload],
        labels: &[String],
        on_done: &(dyn Fn(&str) + Sync),
    ) -> Vec<Result<ImageCreate, UploadError>> {
        let run = |upload: &Upload| {
            let result = self.process(upload, labels);
            if let Err(err) = &result {
                log::warn!("upload {} failed: {err}", upload.file_name);
            }
            on_done(&upload.file_name);
            result
        };

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_concurrent_uploads.max(1))
            .build()
        {
            Ok(pool) => pool.install(|| uploads.par_iter().map(run).collect()),
            Err(err) => {
                log::warn!("couldn't start upload workers, processing sequentially: {err}");
                uploads.iter().map(run).collect()
            }
        }
    }

    /// Re-run analysis on stored bytes.
    pub fn analyze(&self, bytes: &[u8]) -> Result<Analysis, UploadError> {
        let img = images::decode(bytes).map_err(|err| UploadError::InvalidImage(format!("{err:#}")))?;
        self.analyze_decoded(bytes, &img)
    }

    fn analyze_decoded(&self, bytes: &[u8], img: &DynamicImage) -> Result<Analysis, UploadError> {
        let captions = match &self.capabilities.captioner {
            Some(captioner) => captioner.caption(bytes).unwrap_or_else(|err| {
                log::warn!("captioning failed: {err}");
                Captions::default()
            }),
            None => Captions::default(),
        };

        let ocr_text = match &self.capabilities.ocr {
            Some(ocr) => ocr.recognize(bytes).unwrap_or_else(|err| {
                log::warn!("ocr failed: {err}");
                String::new()
            }),
            None => String::new(),
        };

        let ai_keywords = preprocess::extract_keywords(
            &format!("{} {}", captions.short, captions.detailed),
            KEYWORD_MIN_LEN,
            MAX_KEYWORDS,
        );

        let caption_embedding = preprocess::caption_input(&captions.short, &captions.detailed)
            .and_then(|content| match self.capabilities.embedder.embed(&content) {
                Ok(embedding) => Some(embedding),
                Err(err) => {
                    log::warn!("caption embedding failed: {err}");
                    None
                }
            });

        let thumbnail_id =
            match images::make_thumbnail(img, self.config.thumbnail_size, self.config.thumbnail_quality) {
                Ok(thumbnail) => {
                    let id = format!("{}.thumb.webp", storage::new_blob_id());
                    let (width, height) = thumbnail.dimensions;
                    log::debug!("thumbnail {id}: {width}x{height}");
                    self.storage.write(&id, &thumbnail.data)?;
                    Some(id)
                }
                Err(err) => {
                    log::warn!("thumbnail failed: {err:#}");
                    None
                }
            };

        Ok(Analysis {
            width: Some(img.width()),
            height: Some(img.height()),
            format: images::detect_format(bytes).map(images::format_name),
            exif: exif::read_exif(bytes),
            short_caption: captions.short,
            detailed_caption: captions.detailed,
            ai_keywords,
            ocr_text,
            caption_embedding,
            thumbnail_id,
        })
    }
}
