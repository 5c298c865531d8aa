//! Text embedding capability.
//!
//! `Embedder` is the handle the rest of the crate depends on. The fastembed
//! backed `EmbeddingModel` is built once at startup and injected; tests use
//! deterministic fakes.

use fastembed::{InitOptions, TextEmbedding};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Mutex;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Identifies the embedding space in `vectors.bin`.
    fn model_id(&self) -> [u8; 32] {
        model_id(self.name())
    }
}

/// Canonical spelling of a supported model name, ignoring case and aliases.
fn canonical_name(name: &str) -> Option<&'static str> {
    match name.trim().to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminiml6v2" => Some("all-MiniLM-L6-v2"),
        "all-minilm-l6-v2-q" | "allminiml6v2q" => Some("all-MiniLM-L6-v2-q"),
        "bge-small-en-v1.5" | "bgesmallenv15" => Some("bge-small-en-v1.5"),
        "bge-base-en-v1.5" | "bgebaseenv15" => Some("bge-base-en-v1.5"),
        "bge-large-en-v1.5" | "bgelargeenv15" => Some("bge-large-en-v1.5"),
        _ => None,
    }
}

/// SHA256 of the canonical model name. Unknown names are hashed as given.
pub fn model_id(name: &str) -> [u8; 32] {
    let name = canonical_name(name).unwrap_or(name);
    Sha256::digest(name.as_bytes()).into()
}

/// fastembed's TextEmbedding behind a Mutex, since embed() takes &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl EmbeddingModel {
    /// Load (downloading on first use) the named model.
    ///
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;
        log::info!("loaded embedding model {model_name} ({dimensions} dims)");

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match canonical_name(name) {
            Some("all-MiniLM-L6-v2") => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            Some("all-MiniLM-L6-v2-q") => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            Some("bge-small-en-v1.5") => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            Some("bge-base-en-v1.5") => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            Some("bge-large-en-v1.5") => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
                name
            ))),
        }
    }

    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Embedder for EmbeddingModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }
}
