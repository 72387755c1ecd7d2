//! Federated averaging over participant gradient updates.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FederationError, FederationResult};
use crate::model::WeightVector;

/// One participant's contribution to a round. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientUpdate {
    pub participant_id: Uuid,
    pub participant_label: String,
    pub gradient: WeightVector,
    pub sample_count: u64,
    pub achieved_accuracy: f64,
    pub submitted_at: DateTime<Utc>,
}

impl GradientUpdate {
    pub fn new(participant_id: Uuid, participant_label: impl Into<String>, gradient: WeightVector, sample_count: u64, achieved_accuracy: f64) -> Self {
        Self { participant_id, participant_label: participant_label.into(), gradient, sample_count, achieved_accuracy, submitted_at: Utc::now() }
    }
}

/// Share of each update in `updates` order. Falls back to equal shares when
/// no update reports any samples.
pub fn contribution_shares(updates: &[GradientUpdate]) -> Vec<f64> {
    let total = total_samples(updates);
    updates.iter().map(|u| share(u, total, updates.len())).collect()
}

fn total_samples(updates: &[GradientUpdate]) -> u64 { updates.iter().map(|u| u.sample_count).sum() }

fn share(u: &GradientUpdate, total: u64, count: usize) -> f64 {
    if total == 0 { 1.0 / count as f64 } else { u.sample_count as f64 / total as f64 }
}

fn canonical_order(a: &GradientUpdate, b: &GradientUpdate) -> Ordering {
    let (ga, gb) = (&a.gradient, &b.gradient);
    a.participant_id
        .cmp(&b.participant_id)
        .then(a.submitted_at.cmp(&b.submitted_at))
        .then(a.sample_count.cmp(&b.sample_count))
        .then(ga.w1.total_cmp(&gb.w1))
        .then(ga.w2.total_cmp(&gb.w2))
        .then(ga.w3.total_cmp(&gb.w3))
        .then(ga.bias.total_cmp(&gb.bias))
        .then(a.achieved_accuracy.total_cmp(&b.achieved_accuracy))
        .then_with(|| a.participant_label.cmp(&b.participant_label))
}

/// Sample-count weighted mean of the gradients.
///
/// Terms are reduced in a canonical order (participant, submission time,
/// sample count, then the gradient and accuracy values themselves) so the
/// result is bit-identical for any permutation of `updates`. Updates equal
/// under that order are equal in every field that feeds the sum.
pub fn aggregate(updates: &[GradientUpdate]) -> FederationResult<WeightVector> {
    if updates.is_empty() {
        return Err(FederationError::EmptyInput);
    }
    let total = total_samples(updates);
    let mut ordered: Vec<&GradientUpdate> = updates.iter().collect();
    ordered.sort_by(|a, b| canonical_order(a, b));
    Ok(ordered
        .into_iter()
        .fold(WeightVector::ZERO, |acc, u| acc.add(&u.gradient.scaled(share(u, total, updates.len())))))
}
