//! Risk classification: feature extraction, rule-based labels, model-backed labels.

#![allow(missing_docs)]

pub mod features;
pub mod model;
pub mod rules;

use std::sync::Arc;

use crate::classifier::features::{FeatureVector, extract_observation};
use crate::classifier::model::ModelClassifier;
use crate::classifier::rules::RuleClassifier;
use crate::core::config::{ClassifierConfig, ClassifierMode};
use crate::pipeline::records::{NetworkObservation, RiskLabel};

/// Everything a classifier may look at for one observation.
///
/// The model path reads `features`; the rule path reads the raw capability
/// text the features were derived from.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub capabilities: &'a str,
    pub features: FeatureVector,
}

impl<'a> ClassifierInput<'a> {
    #[must_use]
    pub fn from_observation(obs: &'a NetworkObservation) -> Self {
        Self {
            capabilities: &obs.capabilities,
            features: extract_observation(obs),
        }
    }
}

/// Pure, thread-safe feature-to-label mapping. Never fails.
pub trait RiskClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn classify(&self, input: &ClassifierInput<'_>) -> RiskLabel;

    /// Classifications that degraded to the fallback label.
    fn failure_count(&self) -> u64 {
        0
    }

    /// Release any held inference resources.
    fn shutdown(&self) {}
}

/// Build the configured classifier.
///
/// `auto` uses the model when a model path is configured and present on disk
/// and the rules otherwise; `model` insists on the model and soft-fails to
/// MEDIUM when it cannot be loaded.
#[must_use]
pub fn build_classifier(config: &ClassifierConfig) -> Arc<dyn RiskClassifier> {
    match (config.mode, config.model_path.as_ref()) {
        (ClassifierMode::Rules, _) => Arc::new(RuleClassifier),
        (ClassifierMode::Model, path) => Arc::new(ModelClassifier::new(
            path.cloned().unwrap_or_default(),
            config.model_sha256.clone(),
        )),
        (ClassifierMode::Auto, Some(path)) if path.exists() => Arc::new(ModelClassifier::new(
            path,
            config.model_sha256.clone(),
        )),
        (ClassifierMode::Auto, _) => Arc::new(RuleClassifier),
    }
}
