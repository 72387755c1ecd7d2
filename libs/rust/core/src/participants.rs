//! Participant roster: each entry owns private samples and a local model.
//!
//! Samples never leave this module except to the in-process trainer and the
//! evaluation helpers; other components only see gradients and summaries.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FederationError, FederationResult};
use crate::model::{LocalModel, Sample, WeightVector};

pub const DEFAULT_COLOR: &str = "#3B82F6";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParticipantStatistics {
    pub total_samples: usize,
    pub fraud_count: usize,
    pub normal_count: usize,
    pub current_accuracy: f64,
}

impl ParticipantStatistics {
    fn from_samples(samples: &[Sample], current_accuracy: f64) -> Self {
        let fraud_count = samples.iter().filter(|s| s.is_fraud()).count();
        Self { total_samples: samples.len(), fraud_count, normal_count: samples.len() - fraud_count, current_accuracy }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub samples: Vec<Sample>,
    pub local_model: LocalModel,
    pub statistics: ParticipantStatistics,
    pub created_at: DateTime<Utc>,
}

/// Roster entry without the private samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub local_model: LocalModel,
    pub statistics: ParticipantStatistics,
    pub created_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(name: impl Into<String>, color: impl Into<String>, samples: Vec<Sample>, initial_weights: WeightVector) -> Self {
        let statistics = ParticipantStatistics::from_samples(&samples, 0.0);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            color: color.into(),
            samples,
            local_model: LocalModel::new(initial_weights),
            statistics,
            created_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            id: self.id,
            name: self.name.clone(),
            color: self.color.clone(),
            local_model: self.local_model.clone(),
            statistics: self.statistics,
            created_at: self.created_at,
        }
    }

    /// Swaps in a new local model and refreshes statistics.
    pub fn set_local_model(&mut self, model: LocalModel, accuracy: f64) {
        self.local_model = model;
        self.statistics = ParticipantStatistics::from_samples(&self.samples, accuracy);
    }
}

#[derive(Default)]
pub struct ParticipantRegistry {
    entries: RwLock<Vec<Participant>>,
}

impl ParticipantRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&self, participant: Participant) -> FederationResult<ParticipantSummary> {
        let name = participant.name.trim();
        if name.is_empty() {
            return Err(FederationError::Validation("participant name must not be empty".into()));
        }
        let mut entries = self.entries.write();
        if entries.iter().any(|p| p.name == participant.name) {
            return Err(FederationError::Validation(format!("participant named {} already exists", participant.name)));
        }
        let summary = participant.summary();
        tracing::debug!(participant_id = %summary.id, name = %summary.name, samples = summary.statistics.total_samples, "participant registered");
        entries.push(participant);
        Ok(summary)
    }

    /// Replaces the whole roster, rejecting duplicate names.
    pub fn replace_all(&self, participants: Vec<Participant>) -> FederationResult<Vec<ParticipantSummary>> {
        for (i, p) in participants.iter().enumerate() {
            if participants[..i].iter().any(|q| q.name == p.name) {
                return Err(FederationError::Validation(format!("duplicate participant name {}", p.name)));
            }
        }
        let summaries = participants.iter().map(Participant::summary).collect();
        *self.entries.write() = participants;
        Ok(summaries)
    }

    pub fn get(&self, id: Uuid) -> FederationResult<Participant> {
        self.entries.read().iter().find(|p| p.id == id).cloned().ok_or(FederationError::ParticipantNotFound(id))
    }

    pub fn list(&self) -> Vec<ParticipantSummary> { self.entries.read().iter().map(Participant::summary).collect() }

    /// `(id, name)` pairs in registration order.
    pub fn roster(&self) -> Vec<(Uuid, String)> {
        self.entries.read().iter().map(|p| (p.id, p.name.clone())).collect()
    }

    pub fn remove(&self, id: Uuid) -> FederationResult<()> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|p| p.id != id);
        if entries.len() == before {
            return Err(FederationError::ParticipantNotFound(id));
        }
        Ok(())
    }

    pub fn store_local_model(&self, id: Uuid, model: LocalModel, accuracy: f64) -> FederationResult<()> {
        let mut entries = self.entries.write();
        let p = entries.iter_mut().find(|p| p.id == id).ok_or(FederationError::ParticipantNotFound(id))?;
        p.set_local_model(model, accuracy);
        Ok(())
    }

    pub fn len(&self) -> usize { self.entries.read().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
