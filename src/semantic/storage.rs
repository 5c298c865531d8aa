//! Binary storage for caption embeddings.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - image_id: u64 (little-endian)
//! - content_hash: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const FORMAT_VERSION: u8 = 1;

/// version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

/// One persisted embedding and the hash of the text it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    pub content_hash: u64,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Default)]
pub struct LoadedVectors {
    pub dimensions: usize,
    pub entries: HashMap<u64, StoredVector>,
}

pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load all entries, rejecting files written for another model.
    pub fn load(&self, expected_model_id: &[u8; 32]) -> Result<LoadedVectors, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        let dimensions = header.dimensions as usize;
        let mut entries = HashMap::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let (id, content_hash, embedding) = read_entry(&mut reader, dimensions)?;
            entries.insert(
                id,
                StoredVector {
                    content_hash,
                    embedding,
                },
            );
        }

        Ok(LoadedVectors {
            dimensions,
            entries,
        })
    }

    /// Write all entries atomically: temp file, fsync, rename.
    ///
    /// Every embedding must have `dimensions` values.
    pub fn save<'a>(
        &self,
        entries: impl IntoIterator<Item = (u64, &'a StoredVector)>,
        dimensions: usize,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let entries: Vec<_> = entries.into_iter().collect();
        if let Some((id, _)) = entries
            .iter()
            .find(|(_, stored)| stored.embedding.len() != dimensions)
        {
            return Err(VectorStorageError::InvalidFormat(format!(
                "embedding for image {id} does not have {dimensions} dimensions"
            )));
        }
        let dimensions = u16::try_from(dimensions).map_err(|_| {
            VectorStorageError::InvalidFormat(format!("too many dimensions: {dimensions}"))
        })?;

        let temp_path = self.path.with_extension("tmp");
        let result = write_to_file(&temp_path, &entries, dimensions, model_id);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

fn write_to_file(
    path: &Path,
    entries: &[(u64, &StoredVector)],
    dimensions: u16,
    model_id: &[u8; 32],
) -> Result<(), VectorStorageError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes[0] = FORMAT_VERSION;
    header_bytes[1..33].copy_from_slice(model_id);
    header_bytes[33..35].copy_from_slice(&dimensions.to_le_bytes());
    header_bytes[35..43].copy_from_slice(&(entries.len() as u64).to_le_bytes());
    let checksum = crc32fast::hash(&header_bytes[0..43]);
    header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());
    writer.write_all(&header_bytes)?;

    for (id, stored) in entries {
        writer.write_all(&id.to_le_bytes())?;
        writer.write_all(&stored.content_hash.to_le_bytes())?;
        for value in &stored.embedding {
            writer.write_all(&value.to_le_bytes())?;
        }
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    Ok(())
}

#[derive(Debug)]
struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            VectorStorageError::InvalidFormat("truncated header".to_string())
        } else {
            e.into()
        }
    })?;

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([
        header_bytes[43],
        header_bytes[44],
        header_bytes[45],
        header_bytes[46],
    ]);
    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header_bytes[35..43]);

    Ok(Header {
        model_id,
        dimensions: u16::from_le_bytes([header_bytes[33], header_bytes[34]]),
        entry_count: u64::from_le_bytes(count_bytes),
    })
}

fn read_entry(
    reader: &mut impl Read,
    dimensions: usize,
) -> Result<(u64, u64, Vec<f32>), VectorStorageError> {
    let mut word = [0u8; 8];
    reader.read_exact(&mut word)?;
    let id = u64::from_le_bytes(word);

    reader.read_exact(&mut word)?;
    let content_hash = u64::from_le_bytes(word);

    let mut embedding = Vec::with_capacity(dimensions);
    let mut float_bytes = [0u8; 4];
    for _ in 0..dimensions {
        reader.read_exact(&mut float_bytes)?;
        embedding.push(f32::from_le_bytes(float_bytes));
    }

    Ok((id, content_hash, embedding))
}
