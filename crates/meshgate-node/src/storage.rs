//! Persistent node state.
//!
//! Two fixed regions in one small state file: the 8-byte node address
//! and the 16-bit packet counter. Reads happen once at startup; writes
//! go through an atomic `.tmp` + rename so a power cut never leaves a
//! torn file. Write errors are surfaced but never fatal: in-memory
//! state stays authoritative and the next successful commit recovers.

use std::path::{Path, PathBuf};

use tokio::fs;

use meshgate_core::types::NodeAddress;

/// State file name under the storage directory.
const STATE_FILE: &str = "node_state";

/// Address (8) + packet counter (2, big-endian).
const STATE_SIZE: usize = 10;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid state file length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("failed to determine storage directory: {0}")]
    Directory(String),
}

/// Persisted node identity and counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    pub address: NodeAddress,
    pub packet_counter: u16,
}

/// Persistent storage rooted at one directory.
pub struct Storage {
    base_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance, creating the directory if needed.
    pub fn new(base_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Create storage at the default path (`~/.meshgate/storage`).
    pub fn default_path() -> Result<Self, StorageError> {
        let home = dirs::home_dir()
            .ok_or_else(|| StorageError::Directory("could not determine home directory".into()))?;
        Self::new(home.join(".meshgate").join("storage"))
    }

    /// Load the node state. Returns `Ok(None)` if no state exists yet.
    pub async fn load_state(&self) -> Result<Option<NodeState>, StorageError> {
        let path = self.base_dir.join(STATE_FILE);
        match fs::read(&path).await {
            Ok(bytes) => {
                if bytes.len() != STATE_SIZE {
                    return Err(StorageError::InvalidLength {
                        expected: STATE_SIZE,
                        actual: bytes.len(),
                    });
                }
                let address =
                    NodeAddress::try_from(&bytes[..8]).expect("slice is exactly 8 bytes");
                let packet_counter = u16::from_be_bytes([bytes[8], bytes[9]]);
                Ok(Some(NodeState {
                    address,
                    packet_counter,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Commit the node state.
    pub async fn save_state(&self, state: NodeState) -> Result<(), StorageError> {
        let mut bytes = [0u8; STATE_SIZE];
        bytes[..8].copy_from_slice(state.address.as_ref());
        bytes[8..].copy_from_slice(&state.packet_counter.to_be_bytes());
        self.atomic_write(&self.base_dir.join(STATE_FILE), &bytes)
            .await
    }

    /// Write data atomically: write to a `.tmp` file then rename.
    async fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}
