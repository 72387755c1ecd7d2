//! Local-training capability.
//!
//! The coordinator asks a [`LocalTrainer`] for one participant's gradient and
//! never looks at how it was produced. Every failure here is soft: the
//! participant is skipped and the round carries on.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use crate::model::{LocalModel, WeightVector};
use crate::participants::ParticipantRegistry;
use crate::settings::{TrainerConfig, TrainerKind, TrainingConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingTask {
    pub participant_id: Uuid,
    pub global_weights: WeightVector,
    pub epochs: usize,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub gradient: WeightVector,
    pub sample_count: u64,
    pub accuracy: f64,
}

impl TrainingOutcome {
    pub fn validate(&self) -> Result<(), TrainerError> {
        if self.sample_count == 0 {
            return Err(TrainerError::Malformed("sample count is zero".into()));
        }
        if !self.gradient.is_finite() {
            return Err(TrainerError::Malformed("gradient is not finite".into()));
        }
        if !(0.0..=1.0).contains(&self.accuracy) {
            return Err(TrainerError::Malformed(format!("accuracy {} outside [0, 1]", self.accuracy)));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("participant {0} not found")]
    UnknownParticipant(Uuid),
    #[error("participant {0} holds no samples")]
    EmptyDataset(Uuid),
    #[error("trainer process i/o failed: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("trainer exited with status {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("malformed trainer output: {0}")]
    Malformed(String),
    #[error("trainer timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait LocalTrainer: Send + Sync {
    async fn train(&self, task: &TrainingTask) -> Result<TrainingOutcome, TrainerError>;

    fn kind(&self) -> &'static str;
}

/// Trains against the roster held in this process.
pub struct InProcessTrainer {
    participants: Arc<ParticipantRegistry>,
}

impl InProcessTrainer {
    pub fn new(participants: Arc<ParticipantRegistry>) -> Self { Self { participants } }
}

#[async_trait]
impl LocalTrainer for InProcessTrainer {
    async fn train(&self, task: &TrainingTask) -> Result<TrainingOutcome, TrainerError> {
        let participant = self
            .participants
            .get(task.participant_id)
            .map_err(|_| TrainerError::UnknownParticipant(task.participant_id))?;
        if participant.samples.is_empty() {
            return Err(TrainerError::EmptyDataset(task.participant_id));
        }
        let mut model = LocalModel::new(task.global_weights);
        let gradient = model.train(&participant.samples, task.epochs);
        model.update_weights(&gradient, task.learning_rate);
        let accuracy = model.evaluate(&participant.samples);
        // the participant may have been removed meanwhile; the gradient is still valid
        if let Err(e) = self.participants.store_local_model(task.participant_id, model, accuracy) {
            tracing::debug!(participant_id = %task.participant_id, error = %e, "local model not stored");
        }
        Ok(TrainingOutcome { gradient, sample_count: participant.samples.len() as u64, accuracy })
    }

    fn kind(&self) -> &'static str { "in_process" }
}

/// What an external trainer prints on stdout.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessReport {
    data_size: u64,
    gradients: WeightVector,
    accuracy: f64,
}

/// Runs `program args.. <participant_id>`, feeds the task as JSON on stdin and
/// reads a JSON report from stdout.
pub struct ProcessTrainer {
    program: String,
    args: Vec<String>,
}

impl ProcessTrainer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self { Self { program: program.into(), args } }
}

#[async_trait]
impl LocalTrainer for ProcessTrainer {
    async fn train(&self, task: &TrainingTask) -> Result<TrainingOutcome, TrainerError> {
        let payload = serde_json::to_vec(task).map_err(|e| TrainerError::Malformed(e.to_string()))?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(task.participant_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TrainerError::Spawn)?;
        let stdin = child.stdin.take();
        // stdin is fed while stdout and stderr drain, so neither side can
        // block on a full pipe
        let feed = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(&payload).await,
                None => Ok(()),
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(TrainerError::Spawn)?;
        // a trainer that ignores stdin may exit before we finish writing
        if let Err(e) = fed {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(TrainerError::Spawn(e));
            }
        }
        if !output.status.success() {
            return Err(TrainerError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let report: ProcessReport =
            serde_json::from_slice(&output.stdout).map_err(|e| TrainerError::Malformed(e.to_string()))?;
        Ok(TrainingOutcome { gradient: report.gradients, sample_count: report.data_size, accuracy: report.accuracy })
    }

    fn kind(&self) -> &'static str { "process" }
}

/// Gives up on a participant after `limit`.
pub struct BoundedTrainer {
    inner: Arc<dyn LocalTrainer>,
    limit: Duration,
}

impl BoundedTrainer {
    pub fn new(inner: Arc<dyn LocalTrainer>, limit: Duration) -> Self { Self { inner, limit } }
}

#[async_trait]
impl LocalTrainer for BoundedTrainer {
    async fn train(&self, task: &TrainingTask) -> Result<TrainingOutcome, TrainerError> {
        match tokio::time::timeout(self.limit, self.inner.train(task)).await {
            Ok(res) => res,
            Err(_) => Err(TrainerError::Timeout(self.limit)),
        }
    }

    fn kind(&self) -> &'static str { self.inner.kind() }
}

pub fn build_trainer(
    trainer: &TrainerConfig,
    training: &TrainingConfig,
    participants: Arc<ParticipantRegistry>,
) -> anyhow::Result<Arc<dyn LocalTrainer>> {
    let inner: Arc<dyn LocalTrainer> = match trainer.kind {
        TrainerKind::InProcess => Arc::new(InProcessTrainer::new(participants)),
        TrainerKind::Process => {
            let program = trainer
                .program
                .clone()
                .ok_or_else(|| anyhow::anyhow!("trainer.program is required for the process trainer"))?;
            Arc::new(ProcessTrainer::new(program, trainer.args.clone()))
        }
    };
    Ok(Arc::new(BoundedTrainer::new(inner, training.participant_timeout())))
}
