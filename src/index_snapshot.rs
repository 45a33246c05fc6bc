//! On-disk snapshot of the local tool index.
//!
//! Tool identities, metadata, and their pre-computed embeddings are written
//! at ingestion time and loaded read-only at startup, so serving never
//! needs the embedding model for the corpus side.

use crate::error::{AppError, Result};
use crate::types::{ToolIdentity, ToolMetadata};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Snapshot file format version. Increment when the layout changes.
const SNAPSHOT_VERSION: u32 = 1;

/// Magic bytes identifying a valid snapshot file.
const SNAPSHOT_MAGIC: &[u8; 8] = b"SEMROUTE";

/// One indexed tool: identity plus the metadata surfaced in results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedTool {
    pub identity: ToolIdentity,
    pub metadata: ToolMetadata,
}

/// A loaded tool index: tools plus an aligned embedding matrix
/// (`num_tools x embedding_dim`, row i belongs to tool i).
pub struct ToolIndexSnapshot {
    pub tools: Vec<IndexedTool>,
    pub embeddings: Array2<f32>,
}

impl ToolIndexSnapshot {
    pub fn new(tools: Vec<IndexedTool>, embeddings: Array2<f32>) -> Result<Self> {
        if tools.len() != embeddings.nrows() {
            return Err(AppError::SnapshotError(format!(
                "{} tools but {} embedding rows",
                tools.len(),
                embeddings.nrows()
            )));
        }
        Ok(Self { tools, embeddings })
    }

    /// Save the snapshot to a binary file.
    ///
    /// File layout:
    /// - 8 bytes: magic "SEMROUTE"
    /// - 4 bytes: version (u32 LE)
    /// - 32 bytes: SHA256 of the tools block
    /// - 8 bytes: num_tools (u64 LE)
    /// - 8 bytes: embedding_dim (u64 LE)
    /// - 8 bytes: tools block length (u64 LE)
    /// - N bytes: tools block (JSON)
    /// - M bytes: embeddings data (f32 LE, row-major)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::SnapshotError(format!("Failed to create snapshot directory: {}", e))
            })?;
        }

        let tools_block = serde_json::to_vec(&self.tools).map_err(|e| {
            AppError::SnapshotError(format!("Failed to serialize tools block: {}", e))
        })?;
        let tools_hash: [u8; 32] = Sha256::digest(&tools_block).into();

        let file = File::create(path).map_err(|e| {
            AppError::SnapshotError(format!("Failed to create snapshot file: {}", e))
        })?;
        let mut writer = BufWriter::new(file);

        let write_err =
            |e: std::io::Error| AppError::SnapshotError(format!("Failed to write snapshot: {}", e));

        writer.write_all(SNAPSHOT_MAGIC).map_err(write_err)?;
        writer
            .write_all(&SNAPSHOT_VERSION.to_le_bytes())
            .map_err(write_err)?;
        writer.write_all(&tools_hash).map_err(write_err)?;
        writer
            .write_all(&(self.tools.len() as u64).to_le_bytes())
            .map_err(write_err)?;
        writer
            .write_all(&(self.embeddings.ncols() as u64).to_le_bytes())
            .map_err(write_err)?;
        writer
            .write_all(&(tools_block.len() as u64).to_le_bytes())
            .map_err(write_err)?;
        writer.write_all(&tools_block).map_err(write_err)?;

        let data = self.embeddings.as_slice().ok_or_else(|| {
            AppError::SnapshotError("Embeddings array not contiguous".to_string())
        })?;
        for &val in data {
            writer.write_all(&val.to_le_bytes()).map_err(write_err)?;
        }

        writer.flush().map_err(write_err)?;

        tracing::info!(
            path = %path.display(),
            num_tools = self.tools.len(),
            embedding_dim = self.embeddings.ncols(),
            "Tool index snapshot saved"
        );

        Ok(())
    }

    /// Load a snapshot from a binary file.
    ///
    /// Returns None when the file is missing, carries the wrong magic or
    /// version, or fails the content hash check. IO errors past the header
    /// are real errors.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Snapshot file does not exist");
            return Ok(None);
        }

        let file = File::open(path).map_err(|e| {
            AppError::SnapshotError(format!("Failed to open snapshot file: {}", e))
        })?;
        let mut reader = BufReader::new(file);

        let read_err =
            |e: std::io::Error| AppError::SnapshotError(format!("Failed to read snapshot: {}", e));

        let mut magic = [0u8; 8];
        if reader.read_exact(&mut magic).is_err() || &magic != SNAPSHOT_MAGIC {
            tracing::warn!(path = %path.display(), "Invalid snapshot magic, ignoring");
            return Ok(None);
        }

        let mut version_bytes = [0u8; 4];
        reader.read_exact(&mut version_bytes).map_err(read_err)?;
        let version = u32::from_le_bytes(version_bytes);
        if version != SNAPSHOT_VERSION {
            tracing::warn!(
                path = %path.display(),
                snapshot_version = version,
                expected_version = SNAPSHOT_VERSION,
                "Snapshot version mismatch, ignoring"
            );
            return Ok(None);
        }

        let mut tools_hash = [0u8; 32];
        reader.read_exact(&mut tools_hash).map_err(read_err)?;

        let mut u64_bytes = [0u8; 8];
        reader.read_exact(&mut u64_bytes).map_err(read_err)?;
        let num_tools = u64::from_le_bytes(u64_bytes) as usize;

        reader.read_exact(&mut u64_bytes).map_err(read_err)?;
        let embedding_dim = u64::from_le_bytes(u64_bytes) as usize;

        reader.read_exact(&mut u64_bytes).map_err(read_err)?;
        let tools_len = u64::from_le_bytes(u64_bytes) as usize;

        let mut tools_block = vec![0u8; tools_len];
        reader.read_exact(&mut tools_block).map_err(read_err)?;

        let actual_hash: [u8; 32] = Sha256::digest(&tools_block).into();
        if actual_hash != tools_hash {
            tracing::warn!(path = %path.display(), "Snapshot content hash mismatch, ignoring");
            return Ok(None);
        }

        let tools: Vec<IndexedTool> = serde_json::from_slice(&tools_block).map_err(|e| {
            AppError::SnapshotError(format!("Failed to parse tools block: {}", e))
        })?;

        if tools.len() != num_tools {
            return Err(AppError::SnapshotError(format!(
                "Header claims {} tools, block holds {}",
                num_tools,
                tools.len()
            )));
        }

        let total_floats = num_tools * embedding_dim;
        let mut data = vec![0f32; total_floats];
        for val in &mut data {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes).map_err(read_err)?;
            *val = f32::from_le_bytes(bytes);
        }

        let embeddings = Array2::from_shape_vec((num_tools, embedding_dim), data)
            .map_err(|e| AppError::SnapshotError(format!("Failed to reshape embeddings: {}", e)))?;

        tracing::info!(
            path = %path.display(),
            num_tools,
            embedding_dim,
            "Tool index snapshot loaded"
        );

        Ok(Some(Self { tools, embeddings }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_tool(server: &str, name: &str) -> IndexedTool {
        IndexedTool {
            identity: ToolIdentity::new(server, None, name),
            metadata: ToolMetadata {
                description: format!("{} on {}", name, server),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tool_index.bin");

        let tools = vec![make_tool("jira", "create_ticket"), make_tool("m365", "send_mail")];
        let embeddings =
            Array2::from_shape_vec((2, 3), vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]).unwrap();

        let snapshot = ToolIndexSnapshot::new(tools, embeddings.clone()).unwrap();
        snapshot.save(&path).unwrap();

        let loaded = ToolIndexSnapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded.tools.len(), 2);
        assert_eq!(loaded.tools[0].identity.id(), "jira__create_ticket");
        assert_eq!(loaded.embeddings, embeddings);
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let loaded = ToolIndexSnapshot::load(&dir.path().join("nope.bin")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_corrupt_magic_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        fs::write(&path, b"not a snapshot at all").unwrap();

        let loaded = ToolIndexSnapshot::load(&path).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_tampered_tools_block_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tool_index.bin");

        let tools = vec![make_tool("jira", "create_ticket")];
        let embeddings = Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap();
        ToolIndexSnapshot::new(tools, embeddings)
            .unwrap()
            .save(&path)
            .unwrap();

        // Flip a byte inside the tools block (offset past the 68-byte header).
        let mut bytes = fs::read(&path).unwrap();
        bytes[70] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let loaded = ToolIndexSnapshot::load(&path).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_mismatched_rows_rejected() {
        let tools = vec![make_tool("jira", "create_ticket")];
        let embeddings = Array2::zeros((2, 3));
        assert!(ToolIndexSnapshot::new(tools, embeddings).is_err());
    }
}
