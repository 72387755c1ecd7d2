//! Linear-plus-sigmoid fraud classifier over three transaction features.
//!
//! Training only computes a gradient. Weights change solely through
//! [`LocalModel::update_weights`], which lets a participant ship the gradient
//! to the coordinator while the coordinator applies it to the global weights.
//!
//! `train`, `evaluate` and `report` require a non-empty dataset; calling them
//! with an empty one is a programming error and panics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LEARNING_RATE: f64 = 0.01;
/// Probabilities strictly above this value classify as fraud.
pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub amount: f64,
    pub time: f64,
    pub location: f64,
}

/// One labelled transaction. `label` is 1 for fraud, 0 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(flatten)]
    pub features: FeatureVector,
    #[serde(rename = "isFraud")]
    pub label: u8,
}

impl Sample {
    pub fn new(amount: f64, time: f64, location: f64, label: u8) -> Self {
        Self { features: FeatureVector { amount, time, location }, label }
    }

    pub fn is_fraud(&self) -> bool { self.label == 1 }
}

/// Classifier weights, also used as the shape of a gradient.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WeightVector {
    pub w1: f64,
    pub w2: f64,
    pub w3: f64,
    pub bias: f64,
}

impl WeightVector {
    pub const ZERO: WeightVector = WeightVector { w1: 0.0, w2: 0.0, w3: 0.0, bias: 0.0 };

    pub fn new(w1: f64, w2: f64, w3: f64, bias: f64) -> Self { Self { w1, w2, w3, bias } }

    pub fn components(&self) -> [f64; 4] { [self.w1, self.w2, self.w3, self.bias] }

    pub fn from_components(c: [f64; 4]) -> Self { Self { w1: c[0], w2: c[1], w3: c[2], bias: c[3] } }

    pub fn is_finite(&self) -> bool { self.components().iter().all(|v| v.is_finite()) }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::from_components(self.components().map(|v| v * factor))
    }

    pub fn add(&self, other: &WeightVector) -> Self {
        let (a, b) = (self.components(), other.components());
        Self::from_components([a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]])
    }
}

pub fn sigmoid(x: f64) -> f64 { 1.0 / (1.0 + (-x).exp()) }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict { Fraud, Normal }

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub probability: f64,
    pub verdict: Verdict,
    /// Distance from the decision boundary scaled to [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub accuracy: f64,
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

/// A participant's classifier state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalModel {
    pub weights: WeightVector,
    pub last_updated: DateTime<Utc>,
}

impl LocalModel {
    pub fn new(weights: WeightVector) -> Self { Self { weights, last_updated: Utc::now() } }

    pub fn predict(&self, x: &FeatureVector) -> f64 {
        let w = &self.weights;
        sigmoid(w.w1 * x.amount + w.w2 * x.time + w.w3 * x.location + w.bias)
    }

    pub fn classify(&self, x: &FeatureVector) -> Prediction {
        let probability = self.predict(x);
        let verdict = if probability > DECISION_THRESHOLD { Verdict::Fraud } else { Verdict::Normal };
        Prediction { probability, verdict, confidence: (probability - DECISION_THRESHOLD).abs() * 2.0 }
    }

    /// Averaged log-loss gradient over `epochs` passes. Weights stay untouched,
    /// so every epoch sees the same predictions.
    pub fn train(&self, dataset: &[Sample], epochs: usize) -> WeightVector {
        assert!(!dataset.is_empty(), "train requires a non-empty dataset");
        assert!(epochs > 0, "train requires at least one epoch");
        let mut acc = [0.0f64; 4];
        for _ in 0..epochs {
            for s in dataset {
                let error = self.predict(&s.features) - f64::from(s.label);
                acc[0] += error * s.features.amount;
                acc[1] += error * s.features.time;
                acc[2] += error * s.features.location;
                acc[3] += error;
            }
        }
        let n = (dataset.len() * epochs) as f64;
        WeightVector::from_components(acc.map(|v| v / n))
    }

    pub fn update_weights(&mut self, gradient: &WeightVector, learning_rate: f64) {
        self.weights = self.weights.add(&gradient.scaled(-learning_rate));
        self.last_updated = Utc::now();
    }

    pub fn evaluate(&self, dataset: &[Sample]) -> f64 {
        assert!(!dataset.is_empty(), "evaluate requires a non-empty dataset");
        let correct = dataset.iter().filter(|s| self.predicted_label(s) == s.label).count();
        correct as f64 / dataset.len() as f64
    }

    pub fn report(&self, dataset: &[Sample]) -> EvaluationReport {
        let mut r = EvaluationReport { accuracy: self.evaluate(dataset), ..Default::default() };
        for s in dataset {
            match (self.predicted_label(s), s.label) {
                (1, 1) => r.true_positives += 1,
                (0, 0) => r.true_negatives += 1,
                (1, _) => r.false_positives += 1,
                _ => r.false_negatives += 1,
            }
        }
        r.precision = ratio(r.true_positives, r.true_positives + r.false_positives);
        r.recall = ratio(r.true_positives, r.true_positives + r.false_negatives);
        let denom = r.precision + r.recall;
        r.f1_score = if denom > 0.0 { 2.0 * r.precision * r.recall / denom } else { 0.0 };
        r
    }

    fn predicted_label(&self, s: &Sample) -> u8 {
        if self.predict(&s.features) > DECISION_THRESHOLD { 1 } else { 0 }
    }
}

fn ratio(num: usize, denom: usize) -> f64 { if denom == 0 { 0.0 } else { num as f64 / denom as f64 } }

#[cfg(test)]
mod tests {
    use super::*;

    fn model(w: WeightVector) -> LocalModel { LocalModel::new(w) }

    #[test]
    fn zero_weights_sit_on_the_boundary_and_round_down() {
        let m = model(WeightVector::ZERO);
        let x = FeatureVector { amount: 0.3, time: 0.4, location: 0.1 };
        assert_eq!(m.predict(&x), 0.5);
        assert_eq!(m.classify(&x).verdict, Verdict::Normal);
        assert_eq!(m.evaluate(&[Sample::new(0.3, 0.4, 0.1, 0)]), 1.0);
    }

    #[test]
    fn evaluate_counts_exact_matches() {
        // bias pushes every prediction to fraud; 7 of 10 samples are fraud
        let m = model(WeightVector::new(0.0, 0.0, 0.0, 10.0));
        let mut data: Vec<Sample> = (0..7).map(|_| Sample::new(1.0, 0.1, 1.0, 1)).collect();
        data.extend((0..3).map(|_| Sample::new(0.1, 0.5, 0.1, 0)));
        assert!((m.evaluate(&data) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn train_returns_average_gradient_without_mutating() {
        let m = model(WeightVector::ZERO);
        let before = m.clone();
        let g = m.train(&[Sample::new(1.0, 2.0, 3.0, 1)], 3);
        assert_eq!(m, before);
        assert_eq!(g, WeightVector::new(-0.5, -1.0, -1.5, -0.5));
    }

    #[test]
    fn update_weights_steps_against_gradient() {
        let mut m = model(WeightVector::new(0.1, 0.1, 0.1, 0.1));
        m.update_weights(&WeightVector::new(1.0, -1.0, 2.0, 0.5), 0.01);
        let w = m.weights;
        assert!((w.w1 - 0.09).abs() < 1e-12);
        assert!((w.w2 - 0.11).abs() < 1e-12);
        assert!((w.w3 - 0.08).abs() < 1e-12);
        assert!((w.bias - 0.095).abs() < 1e-12);
    }

    #[test]
    fn predict_is_pure() {
        let m = model(WeightVector::new(0.4, -0.2, 0.7, -0.1));
        let x = FeatureVector { amount: 0.9, time: 0.2, location: 1.1 };
        let first = m.predict(&x);
        let data = [Sample::new(0.9, 0.2, 1.1, 1), Sample::new(0.1, 0.6, 0.2, 0)];
        let _ = m.train(&data, 5);
        let _ = m.evaluate(&data);
        assert_eq!(m.predict(&x), first);
    }

    #[test]
    fn report_builds_confusion_matrix() {
        let m = model(WeightVector::new(10.0, 0.0, 0.0, -5.0));
        let data = [
            Sample::new(1.0, 0.0, 0.0, 1), // tp
            Sample::new(1.0, 0.0, 0.0, 0), // fp
            Sample::new(0.0, 0.0, 0.0, 0), // tn
            Sample::new(0.0, 0.0, 0.0, 1), // fn
        ];
        let r = m.report(&data);
        assert_eq!((r.true_positives, r.false_positives, r.true_negatives, r.false_negatives), (1, 1, 1, 1));
        assert!((r.precision - 0.5).abs() < 1e-12);
        assert!((r.recall - 0.5).abs() < 1e-12);
        assert!((r.f1_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn report_without_positive_predictions_has_zero_precision() {
        let m = model(WeightVector::new(0.0, 0.0, 0.0, -5.0));
        let r = m.report(&[Sample::new(1.0, 1.0, 1.0, 1)]);
        assert_eq!(r.precision, 0.0);
        assert_eq!(r.f1_score, 0.0);
    }

    #[test]
    #[should_panic]
    fn evaluate_on_empty_dataset_is_a_programming_error() {
        model(WeightVector::ZERO).evaluate(&[]);
    }
}
