//! Domain errors surfaced by the federation core.

use thiserror::Error;
use uuid::Uuid;

use crate::federated_learning::{RoundId, RoundStatus};

#[derive(Debug, Error)]
pub enum FederationError {
    #[error("no gradient updates to aggregate")]
    EmptyInput,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("training round {0} not found")]
    RoundNotFound(RoundId),
    #[error("participant {0} not found")]
    ParticipantNotFound(Uuid),
    #[error("model version {0} not found")]
    ModelVersionNotFound(u64),
    #[error("no active global model")]
    NoActiveModel,
    #[error("round cannot move from {from} to {to}")]
    InvalidTransition { from: RoundStatus, to: RoundStatus },
    #[error("round {0} no longer accepts updates")]
    RoundClosed(RoundId),
    #[error("round {0} is still in progress")]
    RoundInProgress(RoundId),
    #[error("round {0} is driven by the orchestrator and aggregates on its own")]
    RoundOwnedByOrchestrator(RoundId),
    #[error("aggregation produced non-finite weights")]
    NonFiniteWeights,
}

impl FederationError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RoundNotFound(_) | Self::ParticipantNotFound(_) | Self::ModelVersionNotFound(_) | Self::NoActiveModel
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::RoundClosed(_) | Self::RoundInProgress(_) | Self::RoundOwnedByOrchestrator(_)
        )
    }
}

pub type FederationResult<T> = Result<T, FederationError>;
