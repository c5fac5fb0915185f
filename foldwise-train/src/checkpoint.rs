//! Checkpoint files and their manifest.

use crate::error::TrainError;
use crate::persistence::{atomic_write, atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

const MANIFEST_FILE: &str = "checkpoints.json";

/// A saved model state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub run_name: String,
    pub tag: String,
    /// Epoch parsed from tags like `model_checkpoint_4`.
    pub epoch: Option<usize>,
    pub path: PathBuf,
    /// SHA-256 of the state bytes, hex encoded.
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Writes checkpoint files into one directory and keeps a JSON manifest of them.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    max_checkpoints: Option<usize>,
}

impl CheckpointManager {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            max_checkpoints: None,
        }
    }

    /// Keep only the newest `max` checkpoints; older files are deleted.
    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = Some(max.max(1));
        self
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// All checkpoints, oldest first.
    pub fn list(&self) -> Result<Vec<Checkpoint>, TrainError> {
        Ok(load_json(&self.manifest_path())?.unwrap_or_default())
    }

    /// Write `state` to `<dir>/<tag>.bin` and record it in the manifest.
    pub fn save(&self, run_name: &str, tag: &str, state: &[u8]) -> Result<Checkpoint, TrainError> {
        if tag.is_empty() || tag.contains(['/', '\\']) || tag.starts_with('.') {
            return Err(TrainError::sink(format!("invalid checkpoint tag '{tag}'")));
        }

        let path = self.dir.join(format!("{tag}.bin"));
        atomic_write(&path, state)?;

        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            run_name: run_name.to_string(),
            tag: tag.to_string(),
            epoch: epoch_from_tag(tag),
            path,
            hash: sha256_hex(state),
            size_bytes: state.len() as u64,
            created_at: Utc::now(),
        };

        let mut checkpoints = self.list()?;
        // Re-saving a tag replaces the earlier entry; the file was overwritten.
        checkpoints.retain(|c| c.tag != checkpoint.tag);
        checkpoints.push(checkpoint.clone());

        if let Some(max) = self.max_checkpoints {
            while checkpoints.len() > max {
                let evicted = checkpoints.remove(0);
                if evicted.path.exists() {
                    std::fs::remove_file(&evicted.path)?;
                }
                tracing::debug!(tag = %evicted.tag, "Evicted old checkpoint");
            }
        }

        atomic_write_json(&self.manifest_path(), &checkpoints)?;
        Ok(checkpoint)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn epoch_from_tag(tag: &str) -> Option<usize> {
    tag.rsplit('_').next()?.parse().ok()
}
