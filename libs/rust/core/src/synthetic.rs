//! Synthetic transaction samples for demo participants.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::{Sample, WeightVector};
use crate::participants::Participant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoParticipant {
    pub name: String,
    pub color: String,
    pub samples: usize,
}

pub fn default_demo_roster() -> Vec<DemoParticipant> {
    [("Bank A", "#3B82F6", 100), ("Bank B", "#10B981", 120), ("Bank C", "#F59E0B", 80)]
        .into_iter()
        .map(|(name, color, samples)| DemoParticipant { name: name.into(), color: color.into(), samples })
        .collect()
}

/// Fraud is drawn at a per-call rate in [0.10, 0.20). Fraud transactions are
/// large, happen at unusual times and from unusual locations.
pub fn generate_samples<R: Rng + ?Sized>(rng: &mut R, size: usize) -> Vec<Sample> {
    let fraud_rate = rng.gen_range(0.10..0.20);
    (0..size)
        .map(|_| {
            if rng.gen_bool(fraud_rate) {
                Sample::new(rng.gen_range(0.5..1.4), rng.gen_range(0.0..0.3), rng.gen_range(0.5..1.4), 1)
            } else {
                Sample::new(rng.gen_range(0.0..0.5), rng.gen_range(0.3..0.8), rng.gen_range(0.0..0.5), 0)
            }
        })
        .collect()
}

/// Small positive weights in [0, 0.1).
pub fn small_random_weights<R: Rng + ?Sized>(rng: &mut R) -> WeightVector {
    WeightVector::new(rng.gen_range(0.0..0.1), rng.gen_range(0.0..0.1), rng.gen_range(0.0..0.1), rng.gen_range(0.0..0.1))
}

pub fn build_participant<R: Rng + ?Sized>(rng: &mut R, entry: &DemoParticipant) -> Participant {
    let samples = generate_samples(rng, entry.samples);
    Participant::new(entry.name.clone(), entry.color.clone(), samples, small_random_weights(rng))
}
