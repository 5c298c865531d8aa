use crate::{
    app::local::AppLocal,
    config::Config,
    ingest::{
        analyzer::{Captioner, TesseractOcr, TextRecognizer, VisionApiCaptioner},
        Capabilities,
    },
    photos::BackendCsv,
    semantic::{Embedder, EmbeddingModel},
    storage,
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;

pub struct AppFactory;

impl AppFactory {
    /// Load config, models and catalog from `paths`.
    pub fn create_local_app(paths: &AppPaths) -> Result<AppLocal> {
        let config = Self::create_config(&paths.base_path)?;
        let capabilities = Self::create_capabilities(&config, paths)?;

        let catalog = BackendCsv::load(
            &paths.catalog_path,
            &paths.vectors_path,
            capabilities.embedder.model_id(),
        )?;
        let storage_mgr = storage::BackendLocal::new(&paths.uploads_path)
            .context("failed to create uploads directory")?;

        Ok(AppLocal::new(
            config,
            Arc::new(catalog),
            Arc::new(storage_mgr),
            capabilities,
        ))
    }

    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("failed to create application base directory")?;

        Ok(AppPaths::new(base_path))
    }

    pub fn create_config(base_path: &std::path::Path) -> Result<Arc<Config>> {
        let base_path = base_path
            .to_str()
            .context("base path is not valid utf8")?;
        let config = Config::load_with(base_path)?;

        Ok(Arc::new(config))
    }

    /// The embedding model is required; captioning and OCR are optional.
    pub fn create_capabilities(config: &Config, paths: &AppPaths) -> Result<Capabilities> {
        let embedder = EmbeddingModel::new(&config.embedding.model, paths.base_path.clone())
            .context("failed to load embedding model")?;

        let captioner: Option<Arc<dyn Captioner>> = if config.analyzer.caption.enabled {
            match VisionApiCaptioner::new(&config.analyzer.caption) {
                Ok(captioner) => Some(Arc::new(captioner)),
                Err(err) => {
                    log::warn!("captioning disabled: {err}");
                    None
                }
            }
        } else {
            None
        };

        let ocr: Option<Arc<dyn TextRecognizer>> = if config.analyzer.ocr.enabled {
            Some(Arc::new(TesseractOcr::new(&config.analyzer.ocr)))
        } else {
            None
        };

        Ok(Capabilities {
            embedder: Arc::new(embedder),
            captioner,
            ocr,
        })
    }

    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var("GALLERY_BASE_PATH") {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("could not determine home directory")?
            .context("home directory path is empty")?;

        Ok(home.join(".local/share/gallery"))
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
    pub catalog_path: PathBuf,
    pub vectors_path: PathBuf,
    pub uploads_path: PathBuf,
}

impl AppPaths {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            catalog_path: base_path.join("images.csv"),
            vectors_path: base_path.join("vectors.bin"),
            uploads_path: base_path.join("uploads"),
            base_path,
        }
    }
}
