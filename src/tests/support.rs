use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::app::{AppLocal, AppPaths};
use crate::config::Config;
use crate::ingest::analyzer::{AnalyzerError, Captioner, Captions, TextRecognizer};
use crate::ingest::{Capabilities, Upload};
use crate::photos::{BackendCsv, Catalog, ImageCreate, ImageRecord, ImageUpdate, Snapshot};
use crate::semantic::{Embedder, EmbeddingError};
use crate::storage;

const VOCABULARY: [&str; 4] = ["sunset", "beach", "dog", "city"];

/// Always returns the same vector.
pub struct FixedEmbedder(pub Vec<f32>);

impl Embedder for FixedEmbedder {
    fn name(&self) -> &str {
        "fixed"
    }

    fn dimensions(&self) -> usize {
        self.0.len()
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.0.clone())
    }
}

/// Counts a few known words, so texts about the same thing point the same way.
pub struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    fn name(&self) -> &str {
        "keywords"
    }

    fn dimensions(&self) -> usize {
        VOCABULARY.len()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.to_lowercase();
        Ok(VOCABULARY
            .iter()
            .map(|word| text.matches(word).count() as f32)
            .collect())
    }
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::EmbeddingFailed("model offline".to_string()))
    }
}

pub struct FakeCaptioner {
    pub short: String,
    pub detailed: String,
}

impl Captioner for FakeCaptioner {
    fn caption(&self, _image: &[u8]) -> Result<Captions, AnalyzerError> {
        Ok(Captions {
            short: self.short.clone(),
            detailed: self.detailed.clone(),
        })
    }
}

pub struct BrokenCaptioner;

impl Captioner for BrokenCaptioner {
    fn caption(&self, _image: &[u8]) -> Result<Captions, AnalyzerError> {
        Err(AnalyzerError::Response("no choices".to_string()))
    }
}

pub struct FakeOcr(pub String);

impl TextRecognizer for FakeOcr {
    fn recognize(&self, _image: &[u8]) -> Result<String, AnalyzerError> {
        Ok(self.0.clone())
    }
}

pub fn capabilities() -> Capabilities {
    Capabilities {
        embedder: Arc::new(KeywordEmbedder),
        captioner: Some(Arc::new(FakeCaptioner {
            short: "A sunset over the beach".to_string(),
            detailed: "Orange sky above calm water and sand".to_string(),
        })),
        ocr: Some(Arc::new(FakeOcr("hotel del mar".to_string()))),
    }
}

/// An app over a fresh temp directory. Keep the TempDir alive for the test.
pub fn create_app(capabilities: Capabilities) -> (AppLocal, AppPaths, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let paths = AppPaths::new(tmp.path());

    let config = Config::load_with(tmp.path().to_str().unwrap()).expect("failed to load config");
    let catalog = BackendCsv::load(
        &paths.catalog_path,
        &paths.vectors_path,
        capabilities.embedder.model_id(),
    )
    .expect("failed to load catalog");
    let storage_mgr =
        storage::BackendLocal::new(&paths.uploads_path).expect("failed to create storage");

    let app = AppLocal::new(
        Arc::new(config),
        Arc::new(catalog),
        Arc::new(storage_mgr),
        capabilities,
    );
    (app, paths, tmp)
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]))
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

pub fn upload(file_name: &str, bytes: Vec<u8>) -> Upload {
    Upload {
        file_name: file_name.to_string(),
        bytes,
    }
}

/// Wraps a real catalog and starts failing writes once `writes_left` hits 0.
pub struct FlakyCatalog {
    pub inner: BackendCsv,
    pub writes_left: AtomicUsize,
}

impl FlakyCatalog {
    fn write(&self) -> anyhow::Result<()> {
        self.writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| anyhow::anyhow!("disk full"))
    }
}

impl Catalog for FlakyCatalog {
    fn snapshot(&self) -> Snapshot {
        self.inner.snapshot()
    }

    fn create_many(&self, creates: Vec<ImageCreate>) -> anyhow::Result<Vec<ImageRecord>> {
        self.write()?;
        self.inner.create_many(creates)
    }

    fn update(&self, id: u64, update: ImageUpdate) -> anyhow::Result<Option<ImageRecord>> {
        self.write()?;
        self.inner.update(id, update)
    }

    fn delete(&self, id: u64) -> anyhow::Result<Option<ImageRecord>> {
        self.write()?;
        self.inner.delete(id)
    }
}

/// Like `create_app`, but one upload per batch and a catalog that accepts
/// only `writes` writes.
pub fn create_flaky_app(writes: usize) -> (AppLocal, AppPaths, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let paths = AppPaths::new(tmp.path());
    std::fs::write(tmp.path().join("config.yaml"), "processing:\n  batch_size: 1\n")
        .expect("failed to write config");

    let capabilities = capabilities();
    let config = Config::load_with(tmp.path().to_str().unwrap()).expect("failed to load config");
    let inner = BackendCsv::load(
        &paths.catalog_path,
        &paths.vectors_path,
        capabilities.embedder.model_id(),
    )
    .expect("failed to load catalog");
    let storage_mgr =
        storage::BackendLocal::new(&paths.uploads_path).expect("failed to create storage");

    let app = AppLocal::new(
        Arc::new(config),
        Arc::new(FlakyCatalog {
            inner,
            writes_left: AtomicUsize::new(writes),
        }),
        Arc::new(storage_mgr),
        capabilities,
    );
    (app, paths, tmp)
}
