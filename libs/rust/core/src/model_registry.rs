//! Versioned registry of published global model weights.
//!
//! Versions are append-only and immutable apart from the active flag. The flag
//! is owned here: publishing or activating clears every other flag inside the
//! same write lock, so readers never observe two active versions.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FederationError, FederationResult};
use crate::federated_learning::RoundId;
use crate::model::WeightVector;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub average_accuracy: f64,
    pub participant_count: usize,
    pub total_samples: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalModelVersion {
    pub version: u64,
    pub weights: WeightVector,
    pub performance: ModelPerformance,
    pub originating_round_id: RoundId,
    /// Hex SHA-256 over the little-endian bytes of w1, w2, w3, bias.
    pub checksum: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub fn weights_checksum(w: &WeightVector) -> String {
    let mut hasher = Sha256::new();
    for c in w.components() {
        hasher.update(c.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Default)]
pub struct ModelRegistry {
    versions: RwLock<Vec<GlobalModelVersion>>,
}

impl ModelRegistry {
    pub fn new() -> Self { Self::default() }

    /// Appends the next version as the only active one.
    pub fn publish(&self, weights: WeightVector, performance: ModelPerformance, round_id: RoundId) -> GlobalModelVersion {
        let mut versions = self.versions.write();
        let version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        for v in versions.iter_mut() {
            v.is_active = false;
        }
        let published = GlobalModelVersion {
            version,
            weights,
            performance,
            originating_round_id: round_id,
            checksum: weights_checksum(&weights),
            is_active: true,
            created_at: Utc::now(),
        };
        versions.push(published.clone());
        tracing::info!(version, checksum = %published.checksum, "global model published");
        published
    }

    /// Makes an existing version the single active one.
    pub fn activate(&self, version: u64) -> FederationResult<GlobalModelVersion> {
        let mut versions = self.versions.write();
        if !versions.iter().any(|v| v.version == version) {
            return Err(FederationError::ModelVersionNotFound(version));
        }
        for v in versions.iter_mut() {
            v.is_active = v.version == version;
        }
        tracing::info!(version, "global model activated");
        versions
            .iter()
            .find(|v| v.is_active)
            .cloned()
            .ok_or(FederationError::ModelVersionNotFound(version))
    }

    pub fn active(&self) -> Option<GlobalModelVersion> {
        self.versions.read().iter().find(|v| v.is_active).cloned()
    }

    pub fn get(&self, version: u64) -> FederationResult<GlobalModelVersion> {
        self.versions
            .read()
            .iter()
            .find(|v| v.version == version)
            .cloned()
            .ok_or(FederationError::ModelVersionNotFound(version))
    }

    /// Newest first.
    pub fn list(&self, limit: usize) -> Vec<GlobalModelVersion> {
        self.versions.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn latest_version(&self) -> Option<u64> {
        self.versions.read().iter().map(|v| v.version).max()
    }
}
