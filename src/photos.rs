use crate::semantic::{self, StoredVector, VectorStorage, VectorStorageError};
use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    hash::Hash,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Instant,
};

/// Camera metadata read from EXIF at upload time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExifData {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub date_taken: Option<NaiveDateTime>,
    pub iso: Option<u32>,
    pub aperture: Option<f32>,
    /// As displayed, e.g. "1/250" or "2.5"
    pub shutter_speed: Option<String>,
    pub focal_length: Option<f32>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
}

/// Everything derived from the image bytes by the upload pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub exif: ExifData,
    pub short_caption: String,
    pub detailed_caption: String,
    pub ai_keywords: Vec<String>,
    pub ocr_text: String,
    pub caption_embedding: Option<Vec<f32>>,
    pub thumbnail_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: u64,

    pub file_name: String,
    pub file_size: u64,
    pub blob_id: String,
    pub thumbnail_id: Option<String>,
    pub uploaded_at: DateTime<Utc>,

    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub exif: ExifData,

    pub short_caption: String,
    pub detailed_caption: String,
    pub ai_keywords: Vec<String>,
    pub ocr_text: String,
    pub manual_labels: Vec<String>,

    #[serde(skip)]
    pub caption_embedding: Option<Vec<f32>>,
}

impl Hash for ImageRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialEq for ImageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ImageRecord {}

impl ImageRecord {
    /// Manual labels as one searchable string.
    pub fn label_text(&self) -> String {
        self.manual_labels.join(" ")
    }

    /// Text the caption embedding was computed from.
    pub fn caption_text(&self) -> Option<String> {
        semantic::caption_input(&self.short_caption, &self.detailed_caption)
    }

    pub fn megapixels(&self) -> Option<f64> {
        let (w, h) = (self.width?, self.height?);
        Some(w as f64 * h as f64 / 1_000_000.0)
    }

    /// Common ratio name when within 0.1, otherwise the reduced fraction.
    pub fn aspect_ratio(&self) -> Option<String> {
        let (w, h) = (self.width?, self.height?);
        if w == 0 || h == 0 {
            return None;
        }

        let ratio = w as f64 / h as f64;
        for (name, value) in [
            ("16:9", 16.0 / 9.0),
            ("4:3", 4.0 / 3.0),
            ("3:2", 3.0 / 2.0),
            ("1:1", 1.0),
        ] {
            if (ratio - value).abs() < 0.1 {
                return Some(name.to_string());
            }
        }

        let divisor = gcd(w, h);
        Some(format!("{}:{}", w / divisor, h / divisor))
    }

    pub fn resolution_category(&self) -> &'static str {
        match self.megapixels() {
            None => "Unknown",
            Some(mp) if mp >= 20.0 => "High",
            Some(mp) if mp >= 8.0 => "Medium-High",
            Some(mp) if mp >= 2.0 => "Medium",
            Some(_) => "Low",
        }
    }

    pub fn has_gps(&self) -> bool {
        self.exif.gps_latitude.is_some() && self.exif.gps_longitude.is_some()
    }

    pub fn has_ocr_text(&self) -> bool {
        !self.ocr_text.trim().is_empty()
    }

    fn apply(&mut self, analysis: Analysis) {
        self.width = analysis.width;
        self.height = analysis.height;
        self.format = analysis.format;
        self.exif = analysis.exif;
        self.short_caption = analysis.short_caption;
        self.detailed_caption = analysis.detailed_caption;
        self.ai_keywords = analysis.ai_keywords;
        self.ocr_text = analysis.ocr_text;
        self.caption_embedding = analysis.caption_embedding;
        if analysis.thumbnail_id.is_some() {
            self.thumbnail_id = analysis.thumbnail_id;
        }
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[derive(Debug, Clone, Default)]
pub struct ImageCreate {
    pub file_name: String,
    pub file_size: u64,
    pub blob_id: String,
    /// Defaults to now
    pub uploaded_at: Option<DateTime<Utc>>,
    pub manual_labels: Vec<String>,
    pub analysis: Analysis,
}

#[derive(Debug, Clone, Default)]
pub struct ImageUpdate {
    /// Replace labels
    pub manual_labels: Option<Vec<String>>,
    pub append_labels: Option<Vec<String>>,
    pub remove_labels: Option<Vec<String>>,

    /// Replace everything derived from the image bytes
    pub analysis: Option<Analysis>,
}

impl ImageUpdate {
    pub fn is_noop(&self) -> bool {
        self.manual_labels.is_none()
            && self.append_labels.is_none()
            && self.remove_labels.is_none()
            && self.analysis.is_none()
    }
}

/// Split a comma separated label list.
pub fn parse_labels(labels: &str) -> Vec<String> {
    normalize_labels([labels])
}

/// Trimmed, lowercased, deduplicated labels. Commas separate labels.
pub fn normalize_labels<S: AsRef<str>>(labels: impl IntoIterator<Item = S>) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .into_iter()
        .flat_map(|label| {
            label
                .as_ref()
                .split(',')
                .map(|l| l.trim().to_lowercase())
                .collect::<Vec<_>>()
        })
        .filter(|label| !label.is_empty())
        .filter(|label| seen.insert(label.clone()))
        .collect()
}

/// Immutable view of the catalog at one point in time.
pub type Snapshot = Arc<Vec<ImageRecord>>;

pub trait Catalog: Send + Sync {
    /// Records ordered by id. Later writes never show up in a taken snapshot.
    fn snapshot(&self) -> Snapshot;

    fn create_many(&self, creates: Vec<ImageCreate>) -> anyhow::Result<Vec<ImageRecord>>;

    /// `None` when the id doesn't exist
    fn update(&self, id: u64, update: ImageUpdate) -> anyhow::Result<Option<ImageRecord>>;

    /// Returns the removed record
    fn delete(&self, id: u64) -> anyhow::Result<Option<ImageRecord>>;

    fn get(&self, id: u64) -> Option<ImageRecord> {
        self.snapshot().iter().find(|r| r.id == id).cloned()
    }

    fn create(&self, create: ImageCreate) -> anyhow::Result<ImageRecord> {
        self.create_many(vec![create])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("catalog returned no record"))
    }

    fn total(&self) -> usize {
        self.snapshot().len()
    }
}

/// Flat CSV representation; lists are comma joined.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    id: u64,
    file_name: String,
    file_size: u64,
    blob_id: String,
    thumbnail_id: Option<String>,
    uploaded_at: DateTime<Utc>,
    width: Option<u32>,
    height: Option<u32>,
    format: Option<String>,
    camera_make: Option<String>,
    camera_model: Option<String>,
    date_taken: Option<NaiveDateTime>,
    iso: Option<u32>,
    aperture: Option<f32>,
    shutter_speed: Option<String>,
    focal_length: Option<f32>,
    gps_latitude: Option<f64>,
    gps_longitude: Option<f64>,
    short_caption: String,
    detailed_caption: String,
    ai_keywords: String,
    ocr_text: String,
    manual_labels: String,
}

impl From<&ImageRecord> for CsvRow {
    fn from(record: &ImageRecord) -> Self {
        let exif = record.exif.clone();
        CsvRow {
            id: record.id,
            file_name: record.file_name.clone(),
            file_size: record.file_size,
            blob_id: record.blob_id.clone(),
            thumbnail_id: record.thumbnail_id.clone(),
            uploaded_at: record.uploaded_at,
            width: record.width,
            height: record.height,
            format: record.format.clone(),
            camera_make: exif.camera_make,
            camera_model: exif.camera_model,
            date_taken: exif.date_taken,
            iso: exif.iso,
            aperture: exif.aperture,
            shutter_speed: exif.shutter_speed,
            focal_length: exif.focal_length,
            gps_latitude: exif.gps_latitude,
            gps_longitude: exif.gps_longitude,
            short_caption: record.short_caption.clone(),
            detailed_caption: record.detailed_caption.clone(),
            ai_keywords: record.ai_keywords.join(","),
            ocr_text: record.ocr_text.clone(),
            manual_labels: record.manual_labels.join(","),
        }
    }
}

impl From<CsvRow> for ImageRecord {
    fn from(row: CsvRow) -> Self {
        ImageRecord {
            id: row.id,
            file_name: row.file_name,
            file_size: row.file_size,
            blob_id: row.blob_id,
            thumbnail_id: row.thumbnail_id.filter(|id| !id.is_empty()),
            uploaded_at: row.uploaded_at,
            width: row.width,
            height: row.height,
            format: row.format.filter(|f| !f.is_empty()),
            exif: ExifData {
                camera_make: row.camera_make.filter(|m| !m.is_empty()),
                camera_model: row.camera_model.filter(|m| !m.is_empty()),
                date_taken: row.date_taken,
                iso: row.iso,
                aperture: row.aperture,
                shutter_speed: row.shutter_speed.filter(|s| !s.is_empty()),
                focal_length: row.focal_length,
                gps_latitude: row.gps_latitude,
                gps_longitude: row.gps_longitude,
            },
            short_caption: row.short_caption,
            detailed_caption: row.detailed_caption,
            ai_keywords: split_list(&row.ai_keywords),
            ocr_text: row.ocr_text,
            manual_labels: split_list(&row.manual_labels),
            caption_embedding: None,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Catalog kept in memory and persisted to `images.csv` + `vectors.bin`.
///
/// Writers build the next list from a copy, persist it, then publish it,
/// so readers holding a snapshot never see a half-applied change.
pub struct BackendCsv {
    records: RwLock<Snapshot>,
    path: PathBuf,
    vectors: VectorStorage,
    model_id: [u8; 32],
}

impl BackendCsv {
    /// Open (or create) the catalog. Embeddings are only trusted when they
    /// were written by the model `model_id` refers to and still match the
    /// record's captions.
    pub fn load(path: &Path, vectors_path: &Path, model_id: [u8; 32]) -> anyhow::Result<Self> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new catalog at {}", path.display());
                    write_csv(path, &[])?;
                }
                _ => Err(err)?,
            }
        }

        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(path)?;
        let mut records = vec![];
        for (line, row) in csv_reader.deserialize::<CsvRow>().enumerate() {
            let row = row.with_context(|| format!("malformed catalog row {}", line + 1))?;
            records.push(ImageRecord::from(row));
        }
        records.sort_by_key(|r| r.id);

        log::debug!(
            "took {}ms to read csv",
            now.elapsed().as_micros() as f64 / 1000.0
        );

        let vectors = VectorStorage::new(vectors_path.to_path_buf());
        attach_embeddings(&mut records, &vectors, &model_id);

        Ok(BackendCsv {
            records: RwLock::new(Arc::new(records)),
            path: path.to_path_buf(),
            vectors,
            model_id,
        })
    }

    fn persist(&self, records: &[ImageRecord]) -> anyhow::Result<()> {
        write_csv(&self.path, records)?;

        let stored: Vec<(u64, StoredVector)> = records
            .iter()
            .filter_map(|record| {
                let embedding = record.caption_embedding.clone()?;
                let content = record.caption_text()?;
                Some((
                    record.id,
                    StoredVector {
                        content_hash: semantic::content_hash(&content),
                        embedding,
                    },
                ))
            })
            .collect();

        let dimensions = stored
            .first()
            .map(|(_, s)| s.embedding.len())
            .unwrap_or_default();

        self.vectors
            .save(
                stored.iter().map(|(id, s)| (*id, s)),
                dimensions,
                &self.model_id,
            )
            .context("failed to save vectors")?;

        Ok(())
    }

    /// Copy, mutate, persist, publish.
    fn write<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<ImageRecord>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?;

        let mut next = guard.as_ref().clone();
        let result = mutate(&mut next)?;
        self.persist(&next)?;
        *guard = Arc::new(next);

        Ok(result)
    }
}

fn write_csv(path: &Path, records: &[ImageRecord]) -> anyhow::Result<()> {
    let temp_path = path.with_extension("csv-tmp");
    let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
    if records.is_empty() {
        // serde only writes headers together with the first row
        csv_wrt.write_record(CSV_HEADERS)?;
    }
    for record in records {
        csv_wrt.serialize(CsvRow::from(record))?;
    }
    csv_wrt.flush()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

const CSV_HEADERS: [&str; 23] = [
    "id",
    "file_name",
    "file_size",
    "blob_id",
    "thumbnail_id",
    "uploaded_at",
    "width",
    "height",
    "format",
    "camera_make",
    "camera_model",
    "date_taken",
    "iso",
    "aperture",
    "shutter_speed",
    "focal_length",
    "gps_latitude",
    "gps_longitude",
    "short_caption",
    "detailed_caption",
    "ai_keywords",
    "ocr_text",
    "manual_labels",
];

fn attach_embeddings(records: &mut [ImageRecord], vectors: &VectorStorage, model_id: &[u8; 32]) {
    if !vectors.exists() {
        return;
    }

    let mut loaded = match vectors.load(model_id) {
        Ok(loaded) => loaded,
        Err(VectorStorageError::ModelMismatch) => {
            log::warn!("vectors.bin was built with another model, images need reprocessing");
            return;
        }
        Err(err) => {
            log::error!("ignoring unreadable {}: {err}", vectors.path().display());
            return;
        }
    };

    log::debug!(
        "loaded {} caption embeddings ({} dimensions)",
        loaded.entries.len(),
        loaded.dimensions
    );

    let mut stale = 0;
    for record in records.iter_mut() {
        let Some(stored) = loaded.entries.remove(&record.id) else {
            continue;
        };
        let matches = record
            .caption_text()
            .map(|content| semantic::content_hash(&content) == stored.content_hash)
            .unwrap_or(false);

        if matches {
            record.caption_embedding = Some(stored.embedding);
        } else {
            stale += 1;
        }
    }

    if stale > 0 {
        log::warn!("dropped {stale} stale caption embeddings");
    }
}

impl Catalog for BackendCsv {
    fn snapshot(&self) -> Snapshot {
        match self.records.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn create_many(&self, creates: Vec<ImageCreate>) -> anyhow::Result<Vec<ImageRecord>> {
        self.write(|records| {
            let mut next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
            let mut created = Vec::with_capacity(creates.len());

            for create in creates {
                let mut record = ImageRecord {
                    id: next_id,
                    file_name: create.file_name,
                    file_size: create.file_size,
                    blob_id: create.blob_id,
                    uploaded_at: create.uploaded_at.unwrap_or_else(Utc::now),
                    manual_labels: normalize_labels(create.manual_labels),
                    ..Default::default()
                };
                record.apply(create.analysis);
                next_id += 1;

                records.push(record.clone());
                created.push(record);
            }

            Ok(created)
        })
    }

    fn update(&self, id: u64, update: ImageUpdate) -> anyhow::Result<Option<ImageRecord>> {
        self.write(|records| {
            let Some(record) = records.iter_mut().find(|r| r.id == id) else {
                return Ok(None);
            };

            if let Some(labels) = update.manual_labels {
                record.manual_labels = normalize_labels(labels);
            }

            if let Some(remove) = update.remove_labels {
                let remove = normalize_labels(remove);
                record.manual_labels.retain(|label| !remove.contains(label));
            }

            if let Some(append) = update.append_labels {
                let labels = record.manual_labels.iter().cloned().chain(append);
                record.manual_labels = normalize_labels(labels.collect::<Vec<_>>());
            }

            if let Some(analysis) = update.analysis {
                record.apply(analysis);
            }

            Ok(Some(record.clone()))
        })
    }

    fn delete(&self, id: u64) -> anyhow::Result<Option<ImageRecord>> {
        if !self.snapshot().iter().any(|r| r.id == id) {
            return Ok(None);
        }

        self.write(|records| {
            Ok(records
                .iter()
                .position(|r| r.id == id)
                .map(|idx| records.remove(idx)))
        })
    }
}
