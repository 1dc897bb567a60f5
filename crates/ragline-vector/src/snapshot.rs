//! JSON snapshots of a [`VectorIndex`].
//!
//! A snapshot is written to a temp file next to the target and renamed into
//! place, so a crash mid-save leaves the previous snapshot intact.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use ragline_core::{Chunk, Error, Result};

use crate::index::VectorIndex;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    embedder_id: String,
    dim: Option<usize>,
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            embedder_id: self.embedder_id().to_string(),
            dim: self.dim(),
            chunks: self.chunks().iter().map(|c| Chunk::clone(c)).collect(),
        };

        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, &snapshot)
                .map_err(|e| Error::io(path, std::io::Error::other(e)))?;
            writer.flush().map_err(|e| Error::io(path, e))?;
        }
        tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
        info!(path = %path.display(), chunks = snapshot.chunks.len(), "index snapshot saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("index snapshot {}", path.display())),
            _ => Error::io(path, e),
        })?;
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| corrupt(path, e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(corrupt(path, format!("unsupported snapshot version {}", snapshot.version)));
        }

        let index = VectorIndex::with_dim(snapshot.embedder_id, snapshot.dim);
        let mut items = Vec::with_capacity(snapshot.chunks.len());
        for mut chunk in snapshot.chunks {
            let vector = chunk
                .vector
                .take()
                .ok_or_else(|| corrupt(path, format!("chunk {} has no vector", chunk.id)))?;
            if let Some(dim) = snapshot.dim {
                if vector.len() != dim {
                    return Err(corrupt(path, format!("chunk {} is {}-d, snapshot says {dim}", chunk.id, vector.len())));
                }
            }
            items.push((chunk, vector));
        }
        index.insert_batch(items).map_err(|e| corrupt(path, e.to_string()))?;
        info!(path = %path.display(), chunks = index.len(), "index snapshot loaded");
        Ok(index)
    }

    /// Load a snapshot and require that it was built by `embedder_id`;
    /// vectors from another embedder are not comparable with fresh queries.
    pub fn load_for(path: &Path, embedder_id: &str) -> Result<Self> {
        let index = Self::load(path)?;
        if index.embedder_id() != embedder_id {
            return Err(Error::InvalidConfig(format!(
                "snapshot {} was built with embedder '{}', current embedder is '{}'",
                path.display(),
                index.embedder_id(),
                embedder_id
            )));
        }
        Ok(index)
    }
}

fn corrupt(path: &Path, reason: String) -> Error {
    Error::CorruptSnapshot { path: path.to_path_buf(), reason }
}
