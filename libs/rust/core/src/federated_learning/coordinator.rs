//! Round orchestration on top of the round store and the model registry.
//!
//! Two ways into a round share one conclusion routine:
//! * [`FederatedLearningCoordinator::start_round`] opens an orchestrated round
//!   and drives it on a background task: every participant is asked for an
//!   update in turn, then the round is aggregated and a version published.
//! * [`FederatedLearningCoordinator::open_round`] opens a round that collects
//!   pushed updates until [`FederatedLearningCoordinator::aggregate_round`].

use std::sync::Arc;
use std::time::Instant;

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregation::{aggregate, GradientUpdate};
use super::round::{RoundId, RoundOrigin, RoundStatus, RoundSummary, TrainingRound};
use super::store::{RoundCell, RoundStore};
use super::trainer::{LocalTrainer, TrainingTask};
use crate::error::{FederationError, FederationResult};
use crate::metrics_ext::FL_METRICS;
use crate::model::{EvaluationReport, FeatureVector, LocalModel, Prediction, WeightVector};
use crate::model_registry::{GlobalModelVersion, ModelPerformance, ModelRegistry};
use crate::participants::{Participant, ParticipantRegistry, ParticipantSummary};
use crate::settings::TrainingConfig;
use crate::synthetic::small_random_weights;

/// A gradient pushed by a participant into an open round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSubmission {
    pub round_id: RoundId,
    pub participant_id: Uuid,
    pub gradient: WeightVector,
    pub sample_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub round_id: RoundId,
    pub round_number: u64,
    pub status: RoundStatus,
    pub participant_id: Uuid,
    pub accuracy: f64,
    pub update_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundConclusion {
    pub round: TrainingRound,
    pub model: GlobalModelVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStatus {
    pub active_round: Option<RoundSummary>,
    pub latest_completed_round: Option<RoundSummary>,
    pub global_model: Option<GlobalModelVersion>,
    pub participant_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub model_version: u64,
    pub transaction: FeatureVector,
    #[serde(flatten)]
    pub prediction: Prediction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub model_version: u64,
    pub participant_id: Uuid,
    pub participant_name: String,
    pub sample_count: usize,
    pub report: EvaluationReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionStanding {
    pub version: u64,
    pub average_accuracy: f64,
    /// Accuracy on the requested participant's samples, when one was given.
    pub participant_accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub first: VersionStanding,
    pub second: VersionStanding,
    pub participant_name: Option<String>,
}

pub struct FederatedLearningCoordinator {
    settings: TrainingConfig,
    initial_weights: WeightVector,
    participants: Arc<ParticipantRegistry>,
    rounds: RoundStore,
    registry: Arc<ModelRegistry>,
    trainer: Arc<dyn LocalTrainer>,
}

impl FederatedLearningCoordinator {
    pub fn new(
        settings: TrainingConfig,
        participants: Arc<ParticipantRegistry>,
        registry: Arc<ModelRegistry>,
        trainer: Arc<dyn LocalTrainer>,
    ) -> FederationResult<Self> {
        settings.validate()?;
        let initial_weights = match settings.initial_weight_seed {
            Some(seed) => small_random_weights(&mut StdRng::seed_from_u64(seed)),
            None => small_random_weights(&mut rand::thread_rng()),
        };
        Ok(Self { settings, initial_weights, participants, rounds: RoundStore::new(), registry, trainer })
    }

    pub fn participants(&self) -> &Arc<ParticipantRegistry> { &self.participants }

    pub fn registry(&self) -> &Arc<ModelRegistry> { &self.registry }

    pub fn settings(&self) -> &TrainingConfig { &self.settings }

    /// Weights the next round builds on: the active version, or the initial
    /// small random weights before anything was published.
    pub fn base_weights(&self) -> WeightVector {
        self.registry.active().map(|v| v.weights).unwrap_or(self.initial_weights)
    }

    /// Opens an orchestrated round and returns it in `pending`; the rest of
    /// the round runs on a spawned task. Must be called within a tokio runtime.
    pub fn start_round(self: &Arc<Self>) -> FederationResult<TrainingRound> {
        if self.participants.is_empty() {
            return Err(FederationError::Validation("no participants registered".into()));
        }
        let cell = self.rounds.open(RoundOrigin::Orchestrated)?;
        let snapshot = cell.lock().clone();
        FL_METRICS.rounds_started_total.inc();
        info!(round_id = %snapshot.id, round_number = snapshot.round_number, participants = self.participants.len(), "training round started");
        let driver = tokio::spawn(Arc::clone(self).drive_round(cell.clone()));
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = driver.await {
                this.abandon(&cell, format!("round driver stopped: {e}"));
            }
        });
        Ok(snapshot)
    }

    /// Fails a round whose driver died before reaching a terminal state.
    fn abandon(&self, cell: &RoundCell, reason: String) {
        let mut round = cell.lock();
        if round.is_terminal() {
            return;
        }
        if round.fail(reason.as_str()).is_ok() {
            FL_METRICS.rounds_failed_total.inc();
            tracing::error!(round_id = %round.id, round_number = round.round_number, reason = %reason, "training round abandoned");
        }
    }

    async fn drive_round(self: Arc<Self>, cell: RoundCell) {
        let round_id = cell.lock().id;
        let global_weights = self.base_weights();
        // participants are asked one at a time so only this task appends
        for (participant_id, name) in self.participants.roster() {
            let task = TrainingTask {
                participant_id,
                global_weights,
                epochs: self.settings.epochs,
                learning_rate: self.settings.learning_rate,
            };
            let outcome = match self.trainer.train(&task).await.and_then(|o| o.validate().map(|_| o)) {
                Ok(o) => o,
                Err(e) => {
                    FL_METRICS.participants_skipped_total.inc();
                    warn!(%round_id, %participant_id, participant = %name, trainer = self.trainer.kind(), error = %e, "participant skipped");
                    continue;
                }
            };
            let update = GradientUpdate::new(participant_id, name.as_str(), outcome.gradient, outcome.sample_count, outcome.accuracy);
            if let Err(e) = cell.lock().record_update(update) {
                warn!(%round_id, error = %e, "round closed while collecting updates");
                return;
            }
            FL_METRICS.updates_accepted_total.inc();
            debug!(%round_id, participant = %name, samples = outcome.sample_count, accuracy = outcome.accuracy, "update recorded");
        }
        if let Err(e) = self.conclude(&cell) {
            warn!(%round_id, error = %e, "training round did not publish a model");
        }
    }

    /// Swaps the whole roster, refused while a round is live.
    pub fn replace_roster(&self, roster: Vec<Participant>) -> FederationResult<Vec<ParticipantSummary>> {
        self.rounds.when_idle(|| self.participants.replace_all(roster))
    }

    /// Opens a round that collects pushed updates.
    pub fn open_round(&self) -> FederationResult<TrainingRound> {
        let cell = self.rounds.open(RoundOrigin::Submissions)?;
        let snapshot = cell.lock().clone();
        FL_METRICS.rounds_started_total.inc();
        info!(round_id = %snapshot.id, round_number = snapshot.round_number, "training round opened for submissions");
        Ok(snapshot)
    }

    /// Records a pushed gradient. The participant's local model takes the step
    /// and the resulting accuracy on its own samples is stored with the update.
    pub fn submit_update(&self, submission: UpdateSubmission) -> FederationResult<SubmissionReceipt> {
        if submission.sample_count == 0 {
            return Err(FederationError::Validation("sample_count must be positive".into()));
        }
        if !submission.gradient.is_finite() {
            return Err(FederationError::Validation("gradient must be finite".into()));
        }
        let cell = self.rounds.cell(submission.round_id)?;
        let mut round = cell.lock();
        if !round.status.accepts_updates() {
            return Err(FederationError::RoundClosed(round.id));
        }
        let participant = self.participants.get(submission.participant_id)?;
        let mut local = participant.local_model.clone();
        local.update_weights(&submission.gradient, self.settings.learning_rate);
        let accuracy = if participant.samples.is_empty() { 0.0 } else { local.evaluate(&participant.samples) };
        self.participants.store_local_model(participant.id, local, accuracy)?;
        round.record_update(GradientUpdate::new(
            participant.id,
            participant.name.as_str(),
            submission.gradient,
            submission.sample_count,
            accuracy,
        ))?;
        FL_METRICS.updates_accepted_total.inc();
        info!(round_id = %round.id, participant = %participant.name, samples = submission.sample_count, accuracy, "update submitted");
        Ok(SubmissionReceipt {
            round_id: round.id,
            round_number: round.round_number,
            status: round.status,
            participant_id: participant.id,
            accuracy,
            update_count: round.updates.len(),
        })
    }

    /// Aggregates a submissions round and publishes the next version.
    pub fn aggregate_round(&self, round_id: RoundId) -> FederationResult<RoundConclusion> {
        let cell = self.rounds.cell(round_id)?;
        if cell.lock().origin == RoundOrigin::Orchestrated {
            return Err(FederationError::RoundOwnedByOrchestrator(round_id));
        }
        self.conclude(&cell)
    }

    /// Aggregation, weight update and publication under the round lock, so no
    /// update can slip in between. Any error fails the round.
    fn conclude(&self, cell: &RoundCell) -> FederationResult<RoundConclusion> {
        let mut round = cell.lock();
        if round.is_terminal() {
            return Err(FederationError::RoundClosed(round.id));
        }
        if round.updates.is_empty() {
            round.fail("no participant produced an update")?;
            FL_METRICS.rounds_failed_total.inc();
            warn!(round_id = %round.id, round_number = round.round_number, "training round failed without updates");
            return Err(FederationError::EmptyInput);
        }
        round.begin_aggregation()?;
        match self.publish_from(&round) {
            Ok(model) => {
                round.complete(model.weights, model.performance.average_accuracy, model.version)?;
                FL_METRICS.rounds_completed_total.inc();
                info!(
                    round_id = %round.id,
                    round_number = round.round_number,
                    version = model.version,
                    average_accuracy = model.performance.average_accuracy,
                    duration_ms = round.duration_ms,
                    "training round completed"
                );
                Ok(RoundConclusion { round: round.clone(), model })
            }
            Err(e) => {
                round.fail(e.to_string())?;
                FL_METRICS.rounds_failed_total.inc();
                tracing::error!(round_id = %round.id, error = %e, "aggregation failed");
                Err(e)
            }
        }
    }

    fn publish_from(&self, round: &TrainingRound) -> FederationResult<GlobalModelVersion> {
        let started = Instant::now();
        let gradient = aggregate(&round.updates)?;
        FL_METRICS.aggregation_latency_ms.observe(started.elapsed().as_secs_f64() * 1000.0);
        let mut global = LocalModel::new(self.base_weights());
        global.update_weights(&gradient, self.settings.learning_rate);
        if !global.weights.is_finite() {
            return Err(FederationError::NonFiniteWeights);
        }
        let performance = ModelPerformance {
            average_accuracy: round.average_update_accuracy().unwrap_or(0.0),
            participant_count: round.updates.len(),
            total_samples: round.total_samples(),
        };
        let model = self.registry.publish(global.weights, performance, round.id);
        FL_METRICS.models_published_total.inc();
        Ok(model)
    }

    pub fn round(&self, round_id: RoundId) -> FederationResult<TrainingRound> { self.rounds.snapshot(round_id) }

    pub fn history(&self, limit: usize) -> Vec<RoundSummary> { self.rounds.history(limit) }

    pub fn current_status(&self) -> CurrentStatus {
        CurrentStatus {
            active_round: self.rounds.live().map(|r| r.summary()),
            latest_completed_round: self.rounds.latest_completed().map(|r| r.summary()),
            global_model: self.registry.active(),
            participant_count: self.participants.len(),
        }
    }

    pub fn active_model(&self) -> FederationResult<GlobalModelVersion> {
        self.registry.active().ok_or(FederationError::NoActiveModel)
    }

    pub fn model_version(&self, version: u64) -> FederationResult<GlobalModelVersion> { self.registry.get(version) }

    pub fn model_versions(&self, limit: usize) -> Vec<GlobalModelVersion> { self.registry.list(limit) }

    pub fn activate_version(&self, version: u64) -> FederationResult<GlobalModelVersion> {
        self.registry.activate(version)
    }

    /// Requested version, or the active one.
    fn resolve(&self, version: Option<u64>) -> FederationResult<GlobalModelVersion> {
        match version {
            Some(v) => self.registry.get(v),
            None => self.active_model(),
        }
    }

    pub fn predict(&self, transaction: FeatureVector, version: Option<u64>) -> FederationResult<ModelPrediction> {
        let model = self.resolve(version)?;
        let prediction = LocalModel::new(model.weights).classify(&transaction);
        Ok(ModelPrediction { model_version: model.version, transaction, prediction })
    }

    pub fn evaluate(&self, participant_id: Uuid, version: Option<u64>) -> FederationResult<ModelEvaluation> {
        let participant = self.participants.get(participant_id)?;
        if participant.samples.is_empty() {
            return Err(FederationError::Validation(format!("participant {} holds no samples", participant.name)));
        }
        let model = self.resolve(version)?;
        let report = LocalModel::new(model.weights).report(&participant.samples);
        Ok(ModelEvaluation {
            model_version: model.version,
            participant_id,
            participant_name: participant.name,
            sample_count: participant.samples.len(),
            report,
        })
    }

    pub fn compare(&self, first: u64, second: u64, participant_id: Option<Uuid>) -> FederationResult<ModelComparison> {
        let (a, b) = (self.registry.get(first)?, self.registry.get(second)?);
        let participant = participant_id.map(|id| self.participants.get(id)).transpose()?;
        let on_participant = |w: WeightVector| {
            participant
                .as_ref()
                .filter(|p| !p.samples.is_empty())
                .map(|p| LocalModel::new(w).evaluate(&p.samples))
        };
        Ok(ModelComparison {
            first: VersionStanding {
                version: a.version,
                average_accuracy: a.performance.average_accuracy,
                participant_accuracy: on_participant(a.weights),
            },
            second: VersionStanding {
                version: b.version,
                average_accuracy: b.performance.average_accuracy,
                participant_accuracy: on_participant(b.weights),
            },
            participant_name: participant.map(|p| p.name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federated_learning::trainer::{InProcessTrainer, TrainerError, TrainingOutcome};
    use crate::model::Sample;
    use crate::participants::DEFAULT_COLOR;
    use async_trait::async_trait;
    use std::time::Duration;

    fn samples() -> Vec<Sample> {
        vec![Sample::new(1.0, 0.1, 1.2, 1), Sample::new(0.2, 0.5, 0.1, 0), Sample::new(0.1, 0.7, 0.3, 0)]
    }

    fn settings() -> TrainingConfig { TrainingConfig { initial_weight_seed: Some(11), ..TrainingConfig::default() } }

    fn coordinator_with(trainer: impl Fn(Arc<ParticipantRegistry>) -> Arc<dyn LocalTrainer>, banks: &[&str]) -> Arc<FederatedLearningCoordinator> {
        let participants = Arc::new(ParticipantRegistry::new());
        for name in banks {
            participants.register(Participant::new(*name, DEFAULT_COLOR, samples(), WeightVector::ZERO)).unwrap();
        }
        let trainer = trainer(participants.clone());
        Arc::new(FederatedLearningCoordinator::new(settings(), participants, Arc::new(ModelRegistry::new()), trainer).unwrap())
    }

    fn in_process(banks: &[&str]) -> Arc<FederatedLearningCoordinator> {
        coordinator_with(|p| -> Arc<dyn LocalTrainer> { Arc::new(InProcessTrainer::new(p)) }, banks)
    }

    async fn wait_terminal(c: &FederatedLearningCoordinator, id: RoundId) -> TrainingRound {
        for _ in 0..200 {
            let r = c.round(id).unwrap();
            if r.is_terminal() {
                return r;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("round {id} did not finish");
    }

    /// Fails for one named participant, succeeds with a fixed outcome otherwise.
    struct Selective {
        participants: Arc<ParticipantRegistry>,
        failing: &'static str,
    }

    #[async_trait]
    impl LocalTrainer for Selective {
        async fn train(&self, task: &TrainingTask) -> Result<TrainingOutcome, TrainerError> {
            let p = self.participants.get(task.participant_id).map_err(|_| TrainerError::UnknownParticipant(task.participant_id))?;
            if p.name == self.failing {
                return Err(TrainerError::Exit { code: Some(1), stderr: "boom".into() });
            }
            Ok(TrainingOutcome { gradient: WeightVector::new(0.1, 0.1, 0.1, 0.1), sample_count: 10, accuracy: 0.8 })
        }
        fn kind(&self) -> &'static str { "selective" }
    }

    struct Panicking;

    #[async_trait]
    impl LocalTrainer for Panicking {
        async fn train(&self, _task: &TrainingTask) -> Result<TrainingOutcome, TrainerError> {
            panic!("local training crashed")
        }
        fn kind(&self) -> &'static str { "panicking" }
    }

    fn submit(c: &FederatedLearningCoordinator, round_id: RoundId, gradient: WeightVector) -> FederationResult<SubmissionReceipt> {
        let participant_id = c.participants().roster()[0].0;
        c.submit_update(UpdateSubmission { round_id, participant_id, gradient, sample_count: 3 })
    }

    #[tokio::test]
    async fn orchestrated_round_publishes_first_version() {
        let c = in_process(&["Bank A", "Bank B"]);
        let started = c.start_round().unwrap();
        assert_eq!(started.status, RoundStatus::Pending);
        assert_eq!(started.round_number, 1);
        let done = wait_terminal(&c, started.id).await;
        assert_eq!(done.status, RoundStatus::Completed);
        assert_eq!(done.updates.len(), 2);
        let active = c.active_model().unwrap();
        assert_eq!(active.version, 1);
        assert_eq!(active.originating_round_id, started.id);
        assert_eq!(done.aggregated_weights, Some(active.weights));
        assert_eq!(done.published_version, Some(1));
        assert_eq!(active.performance.participant_count, 2);
        assert_eq!(active.performance.total_samples, 6);
    }

    #[tokio::test]
    async fn failing_participant_is_skipped() {
        let c = coordinator_with(|p| -> Arc<dyn LocalTrainer> { Arc::new(Selective { participants: p, failing: "Bank B" }) }, &["Bank A", "Bank B", "Bank C"]);
        let id = c.start_round().unwrap().id;
        let done = wait_terminal(&c, id).await;
        assert_eq!(done.status, RoundStatus::Completed);
        let names: Vec<_> = done.updates.iter().map(|u| u.participant_label.as_str()).collect();
        assert_eq!(names, vec!["Bank A", "Bank C"]);
        assert_eq!(done.average_accuracy, Some(0.8));
    }

    #[tokio::test]
    async fn round_without_updates_fails_and_publishes_nothing() {
        let c = coordinator_with(|p| -> Arc<dyn LocalTrainer> { Arc::new(Selective { participants: p, failing: "Only" }) }, &["Only"]);
        let id = c.start_round().unwrap().id;
        let done = wait_terminal(&c, id).await;
        assert_eq!(done.status, RoundStatus::Failed);
        assert!(done.ended_at.is_some());
        assert!(matches!(c.active_model(), Err(FederationError::NoActiveModel)));
    }

    #[tokio::test]
    async fn second_version_builds_on_the_first() {
        let c = coordinator_with(|p| -> Arc<dyn LocalTrainer> { Arc::new(Selective { participants: p, failing: "" }) }, &["Bank A"]);
        let first = c.start_round().unwrap().id;
        wait_terminal(&c, first).await;
        let v1 = c.active_model().unwrap();
        let second = c.start_round().unwrap();
        assert_eq!(second.round_number, 2);
        wait_terminal(&c, second.id).await;
        let v2 = c.active_model().unwrap();
        assert_eq!(v2.version, 2);
        let step = WeightVector::new(0.1, 0.1, 0.1, 0.1).scaled(-c.settings().learning_rate);
        assert!((v2.weights.w1 - v1.weights.add(&step).w1).abs() < 1e-12);
        assert!(!c.model_version(1).unwrap().is_active);
    }

    #[tokio::test]
    async fn start_round_requires_participants() {
        let c = in_process(&[]);
        assert!(matches!(c.start_round(), Err(FederationError::Validation(_))));
    }

    #[tokio::test]
    async fn submissions_round_aggregates_on_demand() {
        let c = in_process(&["Bank A", "Bank B"]);
        let round = c.open_round().unwrap();
        assert!(matches!(c.open_round(), Err(FederationError::RoundInProgress(_))));
        let roster = c.participants().roster();
        for (id, _) in &roster {
            let receipt = c
                .submit_update(UpdateSubmission { round_id: round.id, participant_id: *id, gradient: WeightVector::new(0.2, -0.1, 0.3, 0.0), sample_count: 3 })
                .unwrap();
            assert_eq!(receipt.status, RoundStatus::Training);
            assert!((0.0..=1.0).contains(&receipt.accuracy));
        }
        let conclusion = c.aggregate_round(round.id).unwrap();
        assert_eq!(conclusion.round.status, RoundStatus::Completed);
        assert_eq!(conclusion.model.version, 1);
        let late = c.submit_update(UpdateSubmission { round_id: round.id, participant_id: roster[0].0, gradient: WeightVector::ZERO, sample_count: 1 });
        assert!(matches!(late, Err(FederationError::RoundClosed(_))));
        assert!(matches!(c.aggregate_round(round.id), Err(FederationError::RoundClosed(_))));
    }

    #[tokio::test]
    async fn empty_submissions_round_fails_on_aggregate() {
        let c = in_process(&["Bank A"]);
        let round = c.open_round().unwrap();
        assert!(matches!(c.aggregate_round(round.id), Err(FederationError::EmptyInput)));
        assert_eq!(c.round(round.id).unwrap().status, RoundStatus::Failed);
        assert!(c.registry().active().is_none());
    }

    #[tokio::test]
    async fn submission_validation() {
        let c = in_process(&["Bank A"]);
        let round = c.open_round().unwrap();
        let id = c.participants().roster()[0].0;
        let bad = |gradient, sample_count| UpdateSubmission { round_id: round.id, participant_id: id, gradient, sample_count };
        assert!(matches!(c.submit_update(bad(WeightVector::ZERO, 0)), Err(FederationError::Validation(_))));
        assert!(matches!(c.submit_update(bad(WeightVector::new(f64::INFINITY, 0.0, 0.0, 0.0), 1)), Err(FederationError::Validation(_))));
        let unknown = UpdateSubmission { participant_id: Uuid::new_v4(), ..bad(WeightVector::ZERO, 1) };
        assert!(matches!(c.submit_update(unknown), Err(FederationError::ParticipantNotFound(_))));
        let missing = UpdateSubmission { round_id: RoundId::generate(), ..bad(WeightVector::ZERO, 1) };
        assert!(matches!(c.submit_update(missing), Err(FederationError::RoundNotFound(_))));
        assert!(c.round(round.id).unwrap().updates.is_empty());
    }

    #[tokio::test]
    async fn orchestrated_rounds_cannot_be_aggregated_manually() {
        let c = in_process(&["Bank A"]);
        let id = c.start_round().unwrap().id;
        assert!(matches!(c.aggregate_round(id), Err(FederationError::RoundOwnedByOrchestrator(_))));
        wait_terminal(&c, id).await;
    }

    #[tokio::test]
    async fn queries_over_published_models() {
        let c = in_process(&["Bank A"]);
        let id = c.start_round().unwrap().id;
        wait_terminal(&c, id).await;
        let id = c.start_round().unwrap().id;
        wait_terminal(&c, id).await;
        let bank = c.participants().roster()[0].0;

        let x = FeatureVector { amount: 1.0, time: 0.1, location: 1.0 };
        let p = c.predict(x, None).unwrap();
        assert_eq!(p.model_version, 2);
        assert!((p.prediction.confidence - (p.prediction.probability - 0.5).abs() * 2.0).abs() < 1e-12);
        assert!(matches!(c.predict(x, Some(9)), Err(FederationError::ModelVersionNotFound(9))));

        let eval = c.evaluate(bank, Some(1)).unwrap();
        assert_eq!(eval.model_version, 1);
        assert_eq!(eval.sample_count, 3);
        let r = eval.report;
        assert_eq!(r.true_positives + r.true_negatives + r.false_positives + r.false_negatives, 3);

        let cmp = c.compare(1, 2, Some(bank)).unwrap();
        assert_eq!(cmp.participant_name.as_deref(), Some("Bank A"));
        assert!(cmp.first.participant_accuracy.is_some());
        assert!(c.compare(1, 2, None).unwrap().second.participant_accuracy.is_none());
        assert!(matches!(c.compare(1, 2, Some(Uuid::new_v4())), Err(FederationError::ParticipantNotFound(_))));

        c.activate_version(1).unwrap();
        let status = c.current_status();
        assert_eq!(status.global_model.map(|m| m.version), Some(1));
        assert!(status.active_round.is_none());
        assert_eq!(status.latest_completed_round.map(|r| r.round_number), Some(2));
        assert_eq!(c.history(10).len(), 2);
        assert_eq!(c.model_versions(1)[0].version, 2);
    }

    #[test]
    fn rejects_invalid_training_settings() {
        let participants = Arc::new(ParticipantRegistry::new());
        let trainer: Arc<dyn LocalTrainer> = Arc::new(InProcessTrainer::new(participants.clone()));
        let zero_epochs = TrainingConfig { epochs: 0, ..settings() };
        let built = FederatedLearningCoordinator::new(zero_epochs, participants, Arc::new(ModelRegistry::new()), trainer);
        assert!(matches!(built, Err(FederationError::Validation(_))));
    }

    #[tokio::test]
    async fn panicking_trainer_still_ends_the_round() {
        let c = coordinator_with(|_| -> Arc<dyn LocalTrainer> { Arc::new(Panicking) }, &["Bank A", "Bank B"]);
        let id = c.start_round().unwrap().id;
        let done = wait_terminal(&c, id).await;
        assert_eq!(done.status, RoundStatus::Failed);
        assert!(done.failure_reason.unwrap().contains("round driver stopped"));
        assert!(c.current_status().active_round.is_none());
        assert!(c.open_round().is_ok());
    }

    #[tokio::test]
    async fn failed_round_leaves_previous_version_active() {
        let c = coordinator_with(|p| -> Arc<dyn LocalTrainer> { Arc::new(Selective { participants: p, failing: "Bank A" }) }, &["Bank A"]);
        let round = c.open_round().unwrap();
        submit(&c, round.id, WeightVector::new(0.1, 0.1, 0.1, 0.1)).unwrap();
        let v1 = c.aggregate_round(round.id).unwrap().model;

        let id = c.start_round().unwrap().id;
        let done = wait_terminal(&c, id).await;
        assert_eq!(done.status, RoundStatus::Failed);
        assert!(done.published_version.is_none());
        let active = c.active_model().unwrap();
        assert_eq!(active.version, 1);
        assert_eq!(active.weights, v1.weights);
        assert_eq!(c.model_versions(10).len(), 1);
    }

    #[tokio::test]
    async fn overflowing_weights_fail_the_round_and_keep_the_previous_version() {
        let participants = Arc::new(ParticipantRegistry::new());
        participants.register(Participant::new("Bank A", DEFAULT_COLOR, samples(), WeightVector::ZERO)).unwrap();
        let trainer: Arc<dyn LocalTrainer> = Arc::new(InProcessTrainer::new(participants.clone()));
        let huge_step = TrainingConfig { learning_rate: 1e308, ..settings() };
        let c = FederatedLearningCoordinator::new(huge_step, participants, Arc::new(ModelRegistry::new()), trainer).unwrap();

        let first = c.open_round().unwrap();
        submit(&c, first.id, WeightVector::ZERO).unwrap();
        let v1 = c.aggregate_round(first.id).unwrap().model;
        assert!(v1.weights.is_finite());

        let second = c.open_round().unwrap();
        submit(&c, second.id, WeightVector::new(1e10, 0.0, 0.0, 0.0)).unwrap();
        assert!(matches!(c.aggregate_round(second.id), Err(FederationError::NonFiniteWeights)));
        let failed = c.round(second.id).unwrap();
        assert_eq!(failed.status, RoundStatus::Failed);
        assert!(failed.failure_reason.is_some());
        assert!(failed.aggregated_weights.is_none());
        assert_eq!(c.active_model().unwrap().version, 1);
        assert_eq!(c.active_model().unwrap().weights, v1.weights);
        assert_eq!(c.model_versions(10).len(), 1);
    }

    #[tokio::test]
    async fn roster_cannot_be_replaced_during_a_live_round() {
        let c = in_process(&["Bank A"]);
        let round = c.open_round().unwrap();
        let fresh = vec![Participant::new("Bank Z", DEFAULT_COLOR, samples(), WeightVector::ZERO)];
        assert!(matches!(c.replace_roster(fresh.clone()), Err(FederationError::RoundInProgress(id)) if id == round.id));
        assert_eq!(c.participants().roster()[0].1, "Bank A");

        assert!(matches!(c.aggregate_round(round.id), Err(FederationError::EmptyInput)));
        let replaced = c.replace_roster(fresh).unwrap();
        assert_eq!(replaced.len(), 1);
        assert_eq!(c.participants().roster()[0].1, "Bank Z");
    }
}
