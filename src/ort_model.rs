use crate::{
    config::{Device, ModelConfig},
    model::{InferenceError, Model, ModelDescriptor},
};
use ndarray::Array4;
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;

const OUTPUT_NAME: &str = "logits";

const MODEL_TYPE: &str = "CNN-GRU Hybrid";
const BACKBONE: &str = "ResNet50";
const SEQUENCE_MODEL: &str = "Bidirectional GRU";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("model file not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("failed to initialize inference session: {0}")]
    Session(#[from] ort::Error),
}

/// ONNX Runtime backend for the exported CNN-GRU classifier. Sessions are
/// not reentrant, so requests are spread round-robin over a pool of
/// mutex-guarded sessions sized by `model.num_instances`.
pub struct OrtModel {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    descriptor: ModelDescriptor,
}

impl OrtModel {
    pub fn load(config: &ModelConfig) -> Result<Self, LoadError> {
        let model_path = config.get_model_path();
        if !model_path.exists() {
            return Err(LoadError::FileNotFound(model_path));
        }

        match config.device {
            Device::Cuda => ort::init()
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .commit()?,
            Device::Cpu => ort::init().commit()?,
        };

        let num_instances = config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", num_instances);

        let (total_parameters, trainable_parameters) = match sessions[0].lock() {
            Ok(session) => parameter_counts(&session),
            Err(_) => (0, 0),
        };

        let descriptor = ModelDescriptor {
            model_type: MODEL_TYPE.to_string(),
            backbone: BACKBONE.to_string(),
            sequence_model: SEQUENCE_MODEL.to_string(),
            total_parameters,
            trainable_parameters,
            device: config.device.as_str().to_string(),
        };

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            descriptor,
        })
    }
}

/// Parameter counts are stamped into the ONNX custom metadata at export
/// time; absent keys report as zero.
fn parameter_counts(session: &Session) -> (u64, u64) {
    let Ok(metadata) = session.metadata() else {
        return (0, 0);
    };
    let read = |key: &str| {
        metadata
            .custom(key)
            .ok()
            .flatten()
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    };
    (read("total_parameters"), read("trainable_parameters"))
}

impl Model for OrtModel {
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|_| InferenceError::Poisoned)?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| InferenceError::InputTensor(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Run(e.to_string()))?;

        let (_shape, scores) = outputs[OUTPUT_NAME]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::OutputTensor(e.to_string()))?;

        Ok(scores.to_vec())
    }

    fn descriptor(&self) -> ModelDescriptor {
        self.descriptor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_missing_file_fails() {
        let config = ModelConfig {
            onnx_file: "does_not_exist.onnx".to_string(),
            model_dir: PathBuf::from("/nonexistent"),
            num_instances: 1,
            device: Device::Cpu,
        };

        let result = OrtModel::load(&config);
        assert!(matches!(result, Err(LoadError::FileNotFound(_))));
    }
}
