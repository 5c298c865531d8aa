use crate::storage::{self, StorageManager};
use anyhow::Context;
use serde::{Deserialize, Serialize};

const DEFAULT_AI_WEIGHT: f32 = 0.4;
const DEFAULT_MANUAL_WEIGHT: f32 = 0.3;
const DEFAULT_OCR_WEIGHT: f32 = 0.3;
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;
const DEFAULT_RESULT_LIMIT: usize = 100;
const DEFAULT_BELOW_THRESHOLD_PREVIEW: usize = 10;

/// Weights are expected to add up to 1.0, give or take this much.
const WEIGHT_SUM_TOLERANCE: f32 = 0.1;

const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_CAPTION_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_CAPTION_MODEL: &str = "llava";
const DEFAULT_TESSERACT_CMD: &str = "tesseract";

const DEFAULT_MAX_IMAGE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;
const DEFAULT_THUMBNAIL_SIZE: u32 = 256;
const DEFAULT_THUMBNAIL_QUALITY: u8 = 80;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("search.{name} must be between 0.0 and 1.0, got {value}")]
    OutOfRange { name: &'static str, value: f32 },

    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    #[error("processing.thumbnail_quality must be at most 100, got {0}")]
    Quality(u8),

    #[error("processing.supported_formats must not be empty")]
    NoFormats,

    #[error("invalid value for {var}: {value:?}")]
    BadEnv { var: &'static str, value: String },
}

/// Weights and thresholds used to blend and cut search results.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_ai_weight")]
    pub ai_weight: f32,

    #[serde(default = "default_manual_weight")]
    pub manual_weight: f32,

    #[serde(default = "default_ocr_weight")]
    pub ocr_weight: f32,

    /// Minimum blended score [0.0, 1.0] a result needs, inclusive.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_result_limit")]
    pub result_limit: usize,

    /// How many results under the threshold to return for preview.
    #[serde(default = "default_below_threshold_preview")]
    pub below_threshold_preview: usize,

    /// Fail searches instead of falling back to label/OCR scoring
    /// when the query can't be embedded.
    #[serde(default)]
    pub require_embedding: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            ai_weight: DEFAULT_AI_WEIGHT,
            manual_weight: DEFAULT_MANUAL_WEIGHT,
            ocr_weight: DEFAULT_OCR_WEIGHT,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            result_limit: DEFAULT_RESULT_LIMIT,
            below_threshold_preview: DEFAULT_BELOW_THRESHOLD_PREVIEW,
            require_embedding: false,
        }
    }
}

fn default_ai_weight() -> f32 {
    DEFAULT_AI_WEIGHT
}

fn default_manual_weight() -> f32 {
    DEFAULT_MANUAL_WEIGHT
}

fn default_ocr_weight() -> f32 {
    DEFAULT_OCR_WEIGHT
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_result_limit() -> usize {
    DEFAULT_RESULT_LIMIT
}

fn default_below_threshold_preview() -> usize {
    DEFAULT_BELOW_THRESHOLD_PREVIEW
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for caption and query embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

/// Vision model reachable through an OpenAI compatible chat API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptionConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_caption_base_url")]
    pub base_url: String,

    #[serde(default = "default_caption_model")]
    pub model: String,

    /// Name of the env variable holding the API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: DEFAULT_CAPTION_BASE_URL.to_string(),
            model: DEFAULT_CAPTION_MODEL.to_string(),
            api_key_env: None,
        }
    }
}

fn default_caption_base_url() -> String {
    DEFAULT_CAPTION_BASE_URL.to_string()
}

fn default_caption_model() -> String {
    DEFAULT_CAPTION_MODEL.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tesseract_cmd: DEFAULT_TESSERACT_CMD.to_string(),
        }
    }
}

fn default_tesseract_cmd() -> String {
    DEFAULT_TESSERACT_CMD.to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub caption: CaptionConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Upload size limit in bytes
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Longest thumbnail side in pixels
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,

    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,

    /// Accepted file extensions, lowercase without the dot
    #[serde(default = "default_supported_formats")]
    pub supported_formats: Vec<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            thumbnail_quality: DEFAULT_THUMBNAIL_QUALITY,
            supported_formats: default_supported_formats(),
        }
    }
}

fn default_max_image_size() -> u64 {
    DEFAULT_MAX_IMAGE_SIZE
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_concurrent_uploads() -> usize {
    DEFAULT_MAX_CONCURRENT_UPLOADS
}

fn default_thumbnail_size() -> u32 {
    DEFAULT_THUMBNAIL_SIZE
}

fn default_thumbnail_quality() -> u8 {
    DEFAULT_THUMBNAIL_QUALITY
}

fn default_supported_formats() -> Vec<String> {
    ["jpg", "jpeg", "png", "tiff", "tif", "bmp", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

/// Loaded once at startup and shared read-only as `Arc<Config>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            analyzer: AnalyzerConfig::default(),
            processing: ProcessingConfig::default(),
            base_path: String::new(),
        }
    }
}

impl Config {
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let search = &self.search;
        for (name, value) in [
            ("ai_weight", search.ai_weight),
            ("manual_weight", search.manual_weight),
            ("ocr_weight", search.ocr_weight),
            ("similarity_threshold", search.similarity_threshold),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { name, value });
            }
        }

        let sum = search.ai_weight + search.manual_weight + search.ocr_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            log::warn!("search weights add up to {sum:.2}, expected 1.0");
        }

        if search.result_limit == 0 {
            return Err(ConfigError::Zero("search.result_limit"));
        }

        let processing = &mut self.processing;
        if processing.max_concurrent_uploads == 0 {
            processing.max_concurrent_uploads = 1
        }
        if processing.batch_size == 0 {
            return Err(ConfigError::Zero("processing.batch_size"));
        }
        if processing.max_image_size == 0 {
            return Err(ConfigError::Zero("processing.max_image_size"));
        }
        if processing.thumbnail_size == 0 {
            return Err(ConfigError::Zero("processing.thumbnail_size"));
        }
        if processing.thumbnail_quality > 100 {
            return Err(ConfigError::Quality(processing.thumbnail_quality));
        }
        if processing.supported_formats.is_empty() {
            return Err(ConfigError::NoFormats);
        }
        for format in processing.supported_formats.iter_mut() {
            *format = format.trim_start_matches('.').to_lowercase();
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists("config.yaml") {
            store.write(
                "config.yaml",
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read("config.yaml")?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        // env overrides are never written back
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write("config.yaml", config_str.as_bytes())?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let search = &mut self.search;
        for (var, slot) in [
            ("AI_WEIGHT", &mut search.ai_weight),
            ("MANUAL_WEIGHT", &mut search.manual_weight),
            ("OCR_WEIGHT", &mut search.ocr_weight),
            ("SIMILARITY_THRESHOLD", &mut search.similarity_threshold),
        ] {
            if let Some(value) = lookup(var) {
                *slot = value.trim().parse().map_err(|_| ConfigError::BadEnv {
                    var,
                    value: value.clone(),
                })?;
                log::info!("{var} overridden from environment: {slot}");
            }
        }
        Ok(())
    }
}
