//! Training round lifecycle.
//!
//! Status only moves forward along `pending -> training -> aggregating ->
//! completed`; `failed` is reachable from any non-terminal status. Once a
//! round is terminal it never changes again.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregation::GradientUpdate;
use crate::error::{FederationError, FederationResult};
use crate::model::WeightVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub Uuid);

impl RoundId {
    pub fn generate() -> Self { Self(Uuid::new_v4()) }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

impl FromStr for RoundId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Uuid::parse_str(s).map(Self) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus { Pending, Training, Aggregating, Completed, Failed }

impl RoundStatus {
    pub fn is_terminal(self) -> bool { matches!(self, Self::Completed | Self::Failed) }

    pub fn accepts_updates(self) -> bool { matches!(self, Self::Pending | Self::Training) }

    /// Position on the happy path.
    fn rank(self) -> u8 {
        match self { Self::Pending => 0, Self::Training => 1, Self::Aggregating => 2, Self::Completed => 3, Self::Failed => 4 }
    }

    pub fn can_transition_to(self, next: RoundStatus) -> bool {
        use RoundStatus::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Pending | Training, Training) => true,
            (Training, Aggregating) => true,
            (Aggregating, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Training => "training",
            Self::Aggregating => "aggregating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Who drives the round to its conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundOrigin {
    /// Background task pulls an update from every participant, then aggregates.
    Orchestrated,
    /// Participants push updates; a caller triggers aggregation.
    Submissions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRound {
    pub id: RoundId,
    pub round_number: u64,
    pub origin: RoundOrigin,
    pub status: RoundStatus,
    pub updates: Vec<GradientUpdate>,
    pub aggregated_weights: Option<WeightVector>,
    pub average_accuracy: Option<f64>,
    pub published_version: Option<u64>,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Round view without the per-participant updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub id: RoundId,
    pub round_number: u64,
    pub origin: RoundOrigin,
    pub status: RoundStatus,
    pub update_count: usize,
    pub average_accuracy: Option<f64>,
    pub published_version: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl TrainingRound {
    pub fn new(round_number: u64, origin: RoundOrigin) -> Self {
        Self {
            id: RoundId::generate(),
            round_number,
            origin,
            status: RoundStatus::Pending,
            updates: Vec::new(),
            aggregated_weights: None,
            average_accuracy: None,
            published_version: None,
            failure_reason: None,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool { self.status.is_terminal() }

    /// Appends in arrival order and moves the round into `training`.
    pub fn record_update(&mut self, update: GradientUpdate) -> FederationResult<()> {
        if !self.status.accepts_updates() {
            return Err(FederationError::RoundClosed(self.id));
        }
        self.updates.push(update);
        self.transition(RoundStatus::Training)
    }

    pub fn begin_aggregation(&mut self) -> FederationResult<()> { self.transition(RoundStatus::Aggregating) }

    pub fn complete(&mut self, weights: WeightVector, average_accuracy: f64, version: u64) -> FederationResult<()> {
        self.transition(RoundStatus::Completed)?;
        self.aggregated_weights = Some(weights);
        self.average_accuracy = Some(average_accuracy);
        self.published_version = Some(version);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> FederationResult<()> {
        self.transition(RoundStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn average_update_accuracy(&self) -> Option<f64> {
        if self.updates.is_empty() { return None; }
        Some(self.updates.iter().map(|u| u.achieved_accuracy).sum::<f64>() / self.updates.len() as f64)
    }

    pub fn total_samples(&self) -> u64 { self.updates.iter().map(|u| u.sample_count).sum() }

    pub fn summary(&self) -> RoundSummary {
        RoundSummary {
            id: self.id,
            round_number: self.round_number,
            origin: self.origin,
            status: self.status,
            update_count: self.updates.len(),
            average_accuracy: self.average_accuracy,
            published_version: self.published_version,
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_ms: self.duration_ms,
        }
    }

    fn transition(&mut self, next: RoundStatus) -> FederationResult<()> {
        if self.status == next && next == RoundStatus::Training {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(FederationError::InvalidTransition { from: self.status, to: next });
        }
        debug_assert!(next == RoundStatus::Failed || next.rank() > self.status.rank());
        self.status = next;
        if next.is_terminal() {
            let ended = Utc::now();
            self.ended_at = Some(ended);
            self.duration_ms = Some((ended - self.started_at).num_milliseconds());
        }
        Ok(())
    }
}
