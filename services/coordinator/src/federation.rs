use std::sync::Arc;

use anyhow::Result;
use fedbank_core::participants::{Participant, ParticipantSummary, DEFAULT_COLOR};
use fedbank_core::settings::CoordinatorConfig;
use fedbank_core::synthetic::{build_participant, DemoParticipant};
use fedbank_core::{
    build_trainer, FederatedLearningCoordinator, FederationError, FederationResult, LocalTrainer, ModelRegistry,
    ParticipantRegistry,
};
use tracing::info;

/// Owns the coordinator and the roster it trains over.
pub struct FederationModule {
    coordinator: Arc<FederatedLearningCoordinator>,
    demo: Vec<DemoParticipant>,
}

impl FederationModule {
    pub fn new(cfg: &CoordinatorConfig) -> Result<Self> {
        let participants = Arc::new(ParticipantRegistry::new());
        let trainer = build_trainer(&cfg.trainer, &cfg.training, participants.clone())?;
        let trainer_kind = trainer.kind();
        let coordinator = Arc::new(FederatedLearningCoordinator::new(
            cfg.training.clone(),
            participants,
            Arc::new(ModelRegistry::new()),
            trainer,
        )?);
        info!(trainer = trainer_kind, epochs = cfg.training.epochs, "federation_module_initialized");
        Ok(Self { coordinator, demo: cfg.demo.participants.clone() })
    }

    pub fn coordinator(&self) -> &Arc<FederatedLearningCoordinator> { &self.coordinator }

    /// Replaces the roster with freshly generated demo participants.
    pub fn seed_demo_roster(&self) -> FederationResult<Vec<ParticipantSummary>> {
        let mut rng = rand::thread_rng();
        let roster = self.demo.iter().map(|d| build_participant(&mut rng, d)).collect();
        let summaries = self.coordinator.replace_roster(roster)?;
        info!(participants = summaries.len(), "demo_roster_seeded");
        Ok(summaries)
    }

    pub fn register_participant(&self, name: &str, color: Option<&str>, samples: usize) -> FederationResult<ParticipantSummary> {
        if samples == 0 {
            return Err(FederationError::Validation("sample count must be positive".into()));
        }
        let entry = DemoParticipant {
            name: name.trim().to_string(),
            color: color.unwrap_or(DEFAULT_COLOR).to_string(),
            samples,
        };
        let participant: Participant = build_participant(&mut rand::thread_rng(), &entry);
        self.coordinator.participants().register(participant)
    }

    pub async fn shutdown(&self) -> Result<()> {
        let status = self.coordinator.current_status();
        info!(active_round = ?status.active_round.map(|r| r.id), "federation_module_shutdown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeds_configured_demo_roster() {
        let module = FederationModule::new(&CoordinatorConfig::default()).unwrap();
        let seeded = module.seed_demo_roster().unwrap();
        let names: Vec<_> = seeded.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Bank A", "Bank B", "Bank C"]);
        assert_eq!(seeded[2].statistics.total_samples, 80);
        // reseeding replaces rather than appends
        module.seed_demo_roster().unwrap();
        assert_eq!(module.coordinator().participants().len(), 3);
    }

    #[tokio::test]
    async fn reseeding_is_refused_while_a_round_is_live() {
        let module = FederationModule::new(&CoordinatorConfig::default()).unwrap();
        module.seed_demo_roster().unwrap();
        let before = module.coordinator().participants().roster();
        let round = module.coordinator().open_round().unwrap();
        assert!(matches!(module.seed_demo_roster(), Err(FederationError::RoundInProgress(id)) if id == round.id));
        assert_eq!(module.coordinator().participants().roster(), before);
    }

    #[test]
    fn invalid_training_settings_are_rejected() {
        let mut cfg = CoordinatorConfig::default();
        cfg.training.epochs = 0;
        assert!(FederationModule::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn register_rejects_empty_roster_entries() {
        let module = FederationModule::new(&CoordinatorConfig::default()).unwrap();
        assert!(matches!(module.register_participant("Bank Z", None, 0), Err(FederationError::Validation(_))));
        let p = module.register_participant(" Bank Z ", None, 12).unwrap();
        assert_eq!(p.name, "Bank Z");
        assert_eq!(p.color, DEFAULT_COLOR);
        assert!(module.register_participant("Bank Z", Some("#000000"), 5).is_err());
    }
}
