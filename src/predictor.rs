use crate::{
    config::ModelConfig,
    model::{InferenceError, Model},
    ort_model::{LoadError, OrtModel},
    preprocess::{preprocess_image, DecodeError},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Instant};
use thiserror::Error;

/// Diagnostic categories, in the order the classifier emits its scores.
pub const CLASS_NAMES: [&str; 4] = ["Glioma", "Meningioma", "Pituitary", "No Tumor"];

const INPUT_SIZE: &str = "224x224";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("model not loaded")]
    NotLoaded,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("model returned {got} scores for {expected} classes")]
    ScoreCount { got: usize, expected: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: String,
    /// Percentage of the predicted class, rounded to 2 decimals.
    pub confidence_score: f64,
    /// Per-class percentages, each rounded to 2 decimals. Rounding is
    /// applied independently per class, so the sum may drift slightly
    /// from exactly 100.
    pub class_probabilities: BTreeMap<String, f64>,
    pub processing_time_ms: u64,
    /// Same wall-clock measurement in seconds, rounded to 3 decimals.
    pub inference_time: f64,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ModelInfo {
    Loaded {
        model_type: String,
        backbone: String,
        sequence_model: String,
        num_classes: usize,
        class_names: Vec<String>,
        total_parameters: u64,
        trainable_parameters: u64,
        device: String,
        input_size: String,
        status: String,
    },
    NotLoaded {
        status: String,
    },
}

enum PredictorState<M> {
    Unloaded,
    Loaded(M),
}

/// Owns the full inference pipeline: preprocessing, the forward pass and
/// result shaping. Constructed unloaded and loaded exactly once at startup;
/// after that it is read-only and safe to share across request handlers.
pub struct Predictor<M> {
    state: PredictorState<M>,
}

impl<M: Model> Predictor<M> {
    pub fn new() -> Self {
        Self {
            state: PredictorState::Unloaded,
        }
    }

    /// Installs an already-constructed model backend.
    pub fn load_with(&mut self, model: M) {
        self.state = PredictorState::Loaded(model);
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, PredictorState::Loaded(_))
    }

    pub fn predict(&self, image_data: &[u8]) -> Result<PredictionResult, PredictError> {
        let PredictorState::Loaded(model) = &self.state else {
            return Err(PredictError::NotLoaded);
        };

        let started = Instant::now();

        let input = preprocess_image(image_data)?;
        let scores = model.forward(&input)?;
        if scores.len() != CLASS_NAMES.len() {
            return Err(PredictError::ScoreCount {
                got: scores.len(),
                expected: CLASS_NAMES.len(),
            });
        }

        let probabilities = softmax(&scores);
        // Ties break toward the lowest class index.
        let predicted_idx = probabilities
            .iter()
            .enumerate()
            .fold(0, |best, (i, p)| {
                if *p > probabilities[best] {
                    i
                } else {
                    best
                }
            });

        let class_probabilities: BTreeMap<String, f64> = CLASS_NAMES
            .iter()
            .zip(&probabilities)
            .map(|(name, p)| (name.to_string(), round2(*p as f64 * 100.0)))
            .collect();
        let confidence_score = round2(probabilities[predicted_idx] as f64 * 100.0);

        let elapsed = started.elapsed().as_secs_f64();

        Ok(PredictionResult {
            predicted_class: CLASS_NAMES[predicted_idx].to_string(),
            confidence_score,
            class_probabilities,
            processing_time_ms: (elapsed * 1000.0).round() as u64,
            inference_time: round3(elapsed),
        })
    }

    /// Never fails; reports a "not loaded" object before startup completes.
    pub fn info(&self) -> ModelInfo {
        match &self.state {
            PredictorState::Unloaded => ModelInfo::NotLoaded {
                status: "Model not loaded".to_string(),
            },
            PredictorState::Loaded(model) => {
                let descriptor = model.descriptor();
                ModelInfo::Loaded {
                    model_type: descriptor.model_type,
                    backbone: descriptor.backbone,
                    sequence_model: descriptor.sequence_model,
                    num_classes: CLASS_NAMES.len(),
                    class_names: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
                    total_parameters: descriptor.total_parameters,
                    trainable_parameters: descriptor.trainable_parameters,
                    device: descriptor.device,
                    input_size: INPUT_SIZE.to_string(),
                    status: "loaded".to_string(),
                }
            }
        }
    }
}

impl Predictor<OrtModel> {
    /// Builds the ONNX session pool from the configured weights file. A
    /// failure leaves the predictor unloaded.
    pub fn load(&mut self, config: &ModelConfig) -> Result<(), LoadError> {
        let model = OrtModel::load(config)?;
        self.load_with(model);
        Ok(())
    }
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InferenceError, Model, ModelDescriptor};
    use image::{ImageBuffer, Rgb};
    use ndarray::Array4;
    use std::io::Cursor;

    struct MockModel {
        scores: Vec<f32>,
    }

    impl MockModel {
        fn new(scores: Vec<f32>) -> Self {
            Self { scores }
        }
    }

    impl Model for MockModel {
        fn forward(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            Ok(self.scores.clone())
        }

        fn descriptor(&self) -> ModelDescriptor {
            ModelDescriptor {
                model_type: "Mock".to_string(),
                backbone: "None".to_string(),
                sequence_model: "None".to_string(),
                total_parameters: 42,
                trainable_parameters: 7,
                device: "cpu".to_string(),
            }
        }
    }

    fn loaded_predictor(scores: Vec<f32>) -> Predictor<MockModel> {
        let mut predictor = Predictor::new();
        predictor.load_with(MockModel::new(scores));
        predictor
    }

    fn png_bytes() -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(32, 32, Rgb([90, 90, 90]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_predict_before_load_fails() {
        let predictor: Predictor<MockModel> = Predictor::new();
        let result = predictor.predict(&png_bytes());
        assert!(matches!(result, Err(PredictError::NotLoaded)));
    }

    #[test]
    fn test_predict_picks_argmax_class() {
        let predictor = loaded_predictor(vec![0.3, 2.5, 0.1, 0.7]);
        let result = predictor.predict(&png_bytes()).unwrap();

        assert_eq!(result.predicted_class, "Meningioma");
        assert_eq!(
            result.confidence_score,
            result.class_probabilities["Meningioma"]
        );

        let max_class = result
            .class_probabilities
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, _)| name.clone())
            .unwrap();
        assert_eq!(max_class, result.predicted_class);
    }

    #[test]
    fn test_probabilities_are_percentages_summing_to_100() {
        let predictor = loaded_predictor(vec![1.2, -0.4, 0.9, 0.3]);
        let result = predictor.predict(&png_bytes()).unwrap();

        assert_eq!(result.class_probabilities.len(), CLASS_NAMES.len());
        let sum: f64 = result.class_probabilities.values().sum();
        assert!((sum - 100.0).abs() < 0.1, "sum was {}", sum);
        for probability in result.class_probabilities.values() {
            assert!(*probability >= 0.0);
        }
    }

    #[test]
    fn test_ties_break_to_lowest_index() {
        let predictor = loaded_predictor(vec![1.0, 1.0, 1.0, 1.0]);
        let result = predictor.predict(&png_bytes()).unwrap();
        assert_eq!(result.predicted_class, "Glioma");
    }

    #[test]
    fn test_predict_is_deterministic() {
        let predictor = loaded_predictor(vec![0.2, 0.8, 1.7, -0.5]);
        let bytes = png_bytes();

        let first = predictor.predict(&bytes).unwrap();
        let second = predictor.predict(&bytes).unwrap();

        assert_eq!(first.predicted_class, second.predicted_class);
        assert_eq!(first.class_probabilities, second.class_probabilities);
    }

    #[test]
    fn test_predict_wraps_decode_failures() {
        let predictor = loaded_predictor(vec![1.0, 0.0, 0.0, 0.0]);
        let result = predictor.predict(b"definitely not an image");
        assert!(matches!(result, Err(PredictError::Decode(_))));
    }

    #[test]
    fn test_predict_rejects_wrong_score_count() {
        let predictor = loaded_predictor(vec![1.0, 2.0, 3.0]);
        let result = predictor.predict(&png_bytes());
        assert!(matches!(
            result,
            Err(PredictError::ScoreCount {
                got: 3,
                expected: 4
            })
        ));
    }

    #[test]
    fn test_info_reports_lifecycle_status() {
        let unloaded: Predictor<MockModel> = Predictor::new();
        let info = serde_json::to_value(unloaded.info()).unwrap();
        assert_eq!(info["status"], "Model not loaded");

        let loaded = loaded_predictor(vec![1.0, 0.0, 0.0, 0.0]);
        let info = serde_json::to_value(loaded.info()).unwrap();
        assert_eq!(info["status"], "loaded");
        assert_eq!(info["num_classes"], 4);
        assert_eq!(info["class_names"][0], "Glioma");
        assert_eq!(info["class_names"][3], "No Tumor");
        assert_eq!(info["input_size"], "224x224");
        assert_eq!(info["total_parameters"], 42);
    }

    #[test]
    fn test_timings_are_recorded() {
        let predictor = loaded_predictor(vec![0.1, 0.2, 0.3, 0.4]);
        let result = predictor.predict(&png_bytes()).unwrap();

        assert!(result.inference_time >= 0.0);
        // processing_time_ms is the same measurement in integer milliseconds.
        assert!((result.processing_time_ms as f64) < 60_000.0);
    }
}
