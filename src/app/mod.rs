pub mod errors;
pub mod factory;
pub mod local;

pub use errors::AppError;
pub use factory::{AppFactory, AppPaths};
pub use local::{AppLocal, LabelUpdate, SearchPage, UploadReport};
