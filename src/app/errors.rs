use crate::{ingest::UploadError, search::SearchError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("image {0} not found")]
    NotFound(u64),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("Base64: {0:?}")]
    Base64(#[from] base64::DecodeError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
