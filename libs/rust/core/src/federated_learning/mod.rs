//! Federated learning: rounds, federated averaging, local training and the
//! coordinator driving them.

pub mod aggregation;
pub mod coordinator;
pub mod round;
pub mod store;
pub mod trainer;

pub use aggregation::{aggregate, contribution_shares, GradientUpdate};
pub use coordinator::{
    CurrentStatus, FederatedLearningCoordinator, ModelComparison, ModelEvaluation, ModelPrediction, RoundConclusion,
    SubmissionReceipt, UpdateSubmission, VersionStanding,
};
pub use round::{RoundId, RoundOrigin, RoundStatus, RoundSummary, TrainingRound};
pub use store::{RoundCell, RoundStore};
pub use trainer::{
    build_trainer, BoundedTrainer, InProcessTrainer, LocalTrainer, ProcessTrainer, TrainerError, TrainingOutcome,
    TrainingTask,
};
