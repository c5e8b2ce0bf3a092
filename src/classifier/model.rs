//! Model-backed classifier: a pre-trained linear scorer loaded from JSON.
//!
//! The model is acquired lazily on the first `classify` call and released by
//! [`ModelClassifier::shutdown`]. Any failure along the way (missing file,
//! checksum mismatch, wrong shape, non-finite output) degrades to MEDIUM and
//! bumps a failure counter; the pipeline never sees an error from here.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classifier::features::{FEATURE_COUNT, FeatureVector};
use crate::classifier::{ClassifierInput, RiskClassifier};
use crate::core::errors::{Result, WsnError};
use crate::pipeline::records::RiskLabel;

/// Label returned whenever the model cannot produce a verdict.
pub const FALLBACK_LABEL: RiskLabel = RiskLabel::Medium;

/// On-disk model description.
///
/// `labels[i]` names the class scored by `weights[i]` and `bias[i]`. Files
/// exported from the training notebook use `["DANGEROUS", "MEDIUM", "SAFE"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModelFile {
    #[serde(default = "default_version")]
    pub version: u32,
    pub labels: Vec<String>,
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

const fn default_version() -> u32 {
    1
}

/// Validated, ready-to-score model.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    labels: [RiskLabel; 3],
    weights: [[f32; FEATURE_COUNT]; 3],
    bias: [f32; 3],
}

impl LinearModel {
    /// Validate a parsed model file.
    pub fn from_file(file: &LinearModelFile, path: &Path) -> Result<Self> {
        let invalid = |details: String| WsnError::ModelLoad {
            path: path.to_path_buf(),
            details,
        };

        if file.labels.len() != 3 || file.weights.len() != 3 || file.bias.len() != 3 {
            return Err(invalid(format!(
                "expected 3 labels/weight rows/biases, got {}/{}/{}",
                file.labels.len(),
                file.weights.len(),
                file.bias.len()
            )));
        }

        let mut labels = [RiskLabel::Medium; 3];
        for (slot, raw) in labels.iter_mut().zip(&file.labels) {
            *slot = raw
                .parse::<RiskLabel>()
                .map_err(|err| invalid(err.to_string()))?;
        }
        for label in RiskLabel::ALL {
            if !labels.contains(&label) {
                return Err(invalid(format!("label {label} missing from model")));
            }
        }

        let mut weights = [[0.0_f32; FEATURE_COUNT]; 3];
        for (row_idx, row) in file.weights.iter().enumerate() {
            if row.len() != FEATURE_COUNT {
                return Err(invalid(format!(
                    "weight row {row_idx} has {} columns, expected {FEATURE_COUNT}",
                    row.len()
                )));
            }
            if row.iter().any(|w| !w.is_finite()) {
                return Err(invalid(format!("weight row {row_idx} is not finite")));
            }
            weights[row_idx].copy_from_slice(row);
        }

        let mut bias = [0.0_f32; 3];
        bias.copy_from_slice(&file.bias);
        if bias.iter().any(|b| !b.is_finite()) {
            return Err(invalid("bias is not finite".to_string()));
        }

        Ok(Self {
            labels,
            weights,
            bias,
        })
    }

    /// Read, verify and validate a model file.
    pub fn load(path: &Path, expected_sha256: Option<&str>) -> Result<Self> {
        let bytes = fs::read(path).map_err(|source| WsnError::io(path, source))?;

        if let Some(expected) = expected_sha256 {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(WsnError::ModelLoad {
                    path: path.to_path_buf(),
                    details: format!("sha256 mismatch: expected {expected}, got {actual}"),
                });
            }
        }

        let file: LinearModelFile =
            serde_json::from_slice(&bytes).map_err(|err| WsnError::ModelLoad {
                path: path.to_path_buf(),
                details: err.to_string(),
            })?;
        Self::from_file(&file, path)
    }

    /// One score per class, in the file's label order.
    #[must_use]
    pub fn scores(&self, features: &FeatureVector) -> [f32; 3] {
        let x = features.values();
        let mut out = self.bias;
        for (score, row) in out.iter_mut().zip(&self.weights) {
            *score += row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>();
        }
        out
    }

    /// Arg-max over the scores; the first maximum wins ties.
    pub fn predict(&self, features: &FeatureVector) -> Result<RiskLabel> {
        let scores = self.scores(features);
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(WsnError::Inference {
                details: format!("non-finite scores {scores:?}"),
            });
        }
        let mut best = 0;
        for idx in 1..scores.len() {
            if scores[idx] > scores[best] {
                best = idx;
            }
        }
        Ok(self.labels[best])
    }
}

/// Lowercase hex SHA-256 of a byte slice.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

enum ModelSlot {
    Unloaded,
    Ready(Arc<LinearModel>),
    Failed(String),
}

/// Classifier backed by a lazily loaded [`LinearModel`].
pub struct ModelClassifier {
    path: PathBuf,
    expected_sha256: Option<String>,
    slot: RwLock<ModelSlot>,
    failures: AtomicU64,
}

impl ModelClassifier {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, expected_sha256: Option<String>) -> Self {
        Self {
            path: path.into(),
            expected_sha256,
            slot: RwLock::new(ModelSlot::Unloaded),
            failures: AtomicU64::new(0),
        }
    }

    /// Number of classifications that fell back to MEDIUM.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(*self.slot.read(), ModelSlot::Ready(_))
    }

    /// Drop the loaded model; the next `classify` loads it again.
    pub fn shutdown(&self) {
        *self.slot.write() = ModelSlot::Unloaded;
    }

    fn acquire(&self) -> Result<Arc<LinearModel>> {
        match &*self.slot.read() {
            ModelSlot::Ready(model) => return Ok(Arc::clone(model)),
            ModelSlot::Failed(details) => {
                return Err(WsnError::ModelLoad {
                    path: self.path.clone(),
                    details: details.clone(),
                });
            }
            ModelSlot::Unloaded => {}
        }

        let mut slot = self.slot.write();
        // Another caller may have loaded it while we waited for the write lock.
        if let ModelSlot::Ready(model) = &*slot {
            return Ok(Arc::clone(model));
        }
        match LinearModel::load(&self.path, self.expected_sha256.as_deref()) {
            Ok(model) => {
                let model = Arc::new(model);
                *slot = ModelSlot::Ready(Arc::clone(&model));
                Ok(model)
            }
            Err(err) => {
                *slot = ModelSlot::Failed(err.to_string());
                Err(err)
            }
        }
    }

    fn try_classify(&self, features: &FeatureVector) -> Result<RiskLabel> {
        let model = self.acquire()?;
        model.predict(features)
    }
}

impl RiskClassifier for ModelClassifier {
    fn name(&self) -> &'static str {
        "model"
    }

    fn classify(&self, input: &ClassifierInput<'_>) -> RiskLabel {
        match self.try_classify(&input.features) {
            Ok(label) => label,
            Err(err) => {
                let previous = self.failures.fetch_add(1, Ordering::Relaxed);
                // First failure is loud; repeats of a cached load failure stay quiet.
                if previous == 0 || !matches!(err, WsnError::ModelLoad { .. }) {
                    eprintln!("[WSN-CLASSIFY] falling back to {FALLBACK_LABEL}: {err}");
                }
                FALLBACK_LABEL
            }
        }
    }

    fn failure_count(&self) -> u64 {
        Self::failure_count(self)
    }

    fn shutdown(&self) {
        Self::shutdown(self);
    }
}
