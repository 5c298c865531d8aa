//! Caption embeddings: the embedding capability, text preparation and
//! `vectors.bin` persistence.

pub mod embeddings;
pub mod preprocess;
pub mod storage;

pub use embeddings::{Embedder, EmbeddingError, EmbeddingModel};
pub use preprocess::{caption_input, content_hash};
pub use storage::{StoredVector, VectorStorage, VectorStorageError};
