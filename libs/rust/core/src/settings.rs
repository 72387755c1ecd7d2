//! Layered configuration: built-in defaults, then an optional file named by
//! `FED_CONFIG_FILE`, then `FED__*` environment variables
//! (`FED__TRAINING__EPOCHS=10`).

use std::time::Duration;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, FederationResult};
use crate::model::DEFAULT_LEARNING_RATE;
use crate::synthetic::{default_demo_roster, DemoParticipant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub service_name: String,
    pub http_port: u16,
    pub training: TrainingConfig,
    pub trainer: TrainerConfig,
    pub demo: DemoConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            service_name: "coordinator".into(),
            http_port: 5000,
            training: TrainingConfig::default(),
            trainer: TrainerConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub participant_timeout_ms: u64,
    /// Seeds the weights of the very first global model. Random when unset.
    pub initial_weight_seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self { epochs: 5, learning_rate: DEFAULT_LEARNING_RATE, participant_timeout_ms: 30_000, initial_weight_seed: None }
    }
}

impl TrainingConfig {
    pub fn participant_timeout(&self) -> Duration { Duration::from_millis(self.participant_timeout_ms) }

    pub fn validate(&self) -> FederationResult<()> {
        let invalid = |msg: &str| Err(FederationError::Validation(msg.into()));
        if self.epochs == 0 {
            return invalid("training.epochs must be positive");
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid("training.learning_rate must be a positive number");
        }
        if self.participant_timeout_ms == 0 {
            return invalid("training.participant_timeout_ms must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerKind {
    #[default]
    InProcess,
    Process,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub kind: TrainerKind,
    pub program: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub participants: Vec<DemoParticipant>,
}

impl Default for DemoConfig {
    fn default() -> Self { Self { participants: default_demo_roster() } }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        if self.trainer.kind == TrainerKind::Process {
            ensure!(
                self.trainer.program.as_deref().is_some_and(|p| !p.trim().is_empty()),
                "trainer.program is required when trainer.kind = process"
            );
        }
        for p in &self.demo.participants {
            ensure!(!p.name.trim().is_empty(), "demo participant names must not be empty");
            ensure!(p.samples > 0, "demo participant {} needs at least one sample", p.name);
        }
        Ok(())
    }
}

pub fn load_config(service: &str) -> Result<CoordinatorConfig> {
    let mut builder = config::Config::builder().set_default("service_name", service)?;
    if let Ok(file) = std::env::var("FED_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("FED")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("trainer.args"),
    );
    let cfg: CoordinatorConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
