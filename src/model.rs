//! The scoring model interface (spec §1: "out of scope (external
//! collaborators): the scoring model itself"). Inference calls a black-box
//! `score: vector<f32,29> → f32` function; this module provides that trait
//! plus a default pure-Rust implementation so the crate is runnable
//! without a real trained model, and an optional ONNX-backed
//! implementation behind the `onnx` feature for a production model file.

use std::path::Path;

use serde::Deserialize;

use crate::errors::AppError;
use crate::schema::NUM_PCA_FEATURES;

/// Length of the model's input vector: `V1..V28` plus `Amount_normalized`
/// (spec §4.4).
pub const VECTOR_LEN: usize = NUM_PCA_FEATURES + 1;

/// Scores a fixed-order feature vector, returning a risk score in `[0, 1]`.
/// Implementations must be safe to call concurrently from many inference
/// handlers (spec §5: "the underlying inference is thread-safe or
/// serialize calls").
pub trait ScoringModel: Send + Sync {
    fn score(&self, vector: &[f32; VECTOR_LEN]) -> Result<f32, AppError>;
}

/// Weight file format for the default linear/logistic scorer: a bias plus
/// one weight per input dimension, serialized as JSON at `MODEL_PATH`.
#[derive(Debug, Deserialize)]
struct LinearWeights {
    bias: f32,
    weights: Vec<f32>,
}

/// A logistic-regression scorer: `sigmoid(bias + weights · vector)`. This
/// is the crate's default model, used whenever the `onnx` feature is not
/// enabled or no ONNX model path is configured.
pub struct LinearModel {
    bias: f32,
    weights: [f32; VECTOR_LEN],
}

impl LinearModel {
    /// Loads weights from a JSON file at `path`. If the file does not
    /// exist, falls back to a zero-weight model (constant 0.5 output) so
    /// the pipeline can still run end-to-end without a trained model.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "no model file found, using a zero-weight fallback scorer"
            );
            return Ok(Self {
                bias: 0.0,
                weights: [0.0; VECTOR_LEN],
            });
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::ModelInvocation(format!("failed to read model file: {e}")))?;
        let parsed: LinearWeights = serde_json::from_str(&raw)
            .map_err(|e| AppError::ModelInvocation(format!("invalid model file: {e}")))?;

        if parsed.weights.len() != VECTOR_LEN {
            return Err(AppError::ModelInvocation(format!(
                "model file has {} weights, expected {VECTOR_LEN}",
                parsed.weights.len()
            )));
        }

        let mut weights = [0.0f32; VECTOR_LEN];
        weights.copy_from_slice(&parsed.weights);
        Ok(Self {
            bias: parsed.bias,
            weights,
        })
    }
}

impl ScoringModel for LinearModel {
    fn score(&self, vector: &[f32; VECTOR_LEN]) -> Result<f32, AppError> {
        let logit: f32 = self.bias
            + self
                .weights
                .iter()
                .zip(vector.iter())
                .map(|(w, x)| w * x)
                .sum::<f32>();
        Ok(1.0 / (1.0 + (-logit).exp()))
    }
}

/// Builds the configured scoring model: an ONNX session when the `onnx`
/// feature is enabled and `model_path` points at an `.onnx` file, falling
/// back to [`LinearModel`] otherwise.
pub fn load_model(model_path: &Path) -> Result<Box<dyn ScoringModel>, AppError> {
    #[cfg(feature = "onnx")]
    {
        if model_path.extension().and_then(|e| e.to_str()) == Some("onnx") {
            return Ok(Box::new(onnx::OnnxModel::load(model_path)?));
        }
    }
    Ok(Box::new(LinearModel::load(model_path)?))
}

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::Session;
    use ort::value::Tensor;

    use super::{ScoringModel, VECTOR_LEN};
    use crate::errors::AppError;

    /// ONNX Runtime-backed scorer for a real trained model. `ort` sessions
    /// are not `Sync`, so calls are serialized behind a mutex (spec §5
    /// allows either genuine thread-safety or serialized calls).
    pub struct OnnxModel {
        session: Mutex<Session>,
    }

    impl OnnxModel {
        pub fn load(path: &Path) -> Result<Self, AppError> {
            let session = Session::builder()
                .map_err(|e| AppError::ModelInvocation(format!("onnx session builder: {e}")))?
                .commit_from_file(path)
                .map_err(|e| AppError::ModelInvocation(format!("failed to load onnx model: {e}")))?;
            Ok(Self {
                session: Mutex::new(session),
            })
        }
    }

    impl ScoringModel for OnnxModel {
        fn score(&self, vector: &[f32; VECTOR_LEN]) -> Result<f32, AppError> {
            let input = Tensor::from_array(([1, VECTOR_LEN], vector.to_vec().into_boxed_slice()))
                .map_err(|e| AppError::ModelInvocation(format!("onnx input tensor: {e}")))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| AppError::ModelInvocation("onnx session mutex poisoned".into()))?;

            let outputs = session
                .run(ort::inputs![input])
                .map_err(|e| AppError::ModelInvocation(format!("onnx run failed: {e}")))?;

            let (_, data) = outputs[0]
                .try_extract_raw_tensor::<f32>()
                .map_err(|e| AppError::ModelInvocation(format!("onnx output extraction: {e}")))?;

            data.first()
                .copied()
                .ok_or_else(|| AppError::ModelInvocation("onnx model returned no output".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_weight_model_is_used_when_path_missing() {
        let model = LinearModel::load(Path::new("/nonexistent/model.json")).unwrap();
        let vector = [1.0f32; VECTOR_LEN];
        let score = model.score(&vector).unwrap();
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rejects_weight_file_with_wrong_length() {
        let dir = std::env::temp_dir().join(format!("fraudpipe-model-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad_model.json");
        std::fs::write(&path, r#"{"bias": 0.0, "weights": [1.0, 2.0]}"#).unwrap();

        let result = LinearModel::load(&path);
        assert!(result.is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn logistic_output_is_bounded() {
        let model = LinearModel {
            bias: 100.0,
            weights: [1.0; VECTOR_LEN],
        };
        let score = model.score(&[1.0; VECTOR_LEN]).unwrap();
        assert!(score > 0.99);

        let model = LinearModel {
            bias: -100.0,
            weights: [1.0; VECTOR_LEN],
        };
        let score = model.score(&[1.0; VECTOR_LEN]).unwrap();
        assert!(score < 0.01);
    }
}
