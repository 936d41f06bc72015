use ndarray::Array4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("failed to build input tensor: {0}")]
    InputTensor(String),
    #[error("inference failed: {0}")]
    Run(String),
    #[error("failed to extract output tensor: {0}")]
    OutputTensor(String),
    #[error("session mutex poisoned")]
    Poisoned,
}

/// Static description of a loaded model, surfaced through the model-info
/// endpoint.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub model_type: String,
    pub backbone: String,
    pub sequence_model: String,
    pub total_parameters: u64,
    pub trainable_parameters: u64,
    pub device: String,
}

/// A fixed classification network mapping a preprocessed [1, 3, 224, 224]
/// tensor to one unnormalized score per class. Implementations must be safe
/// to call concurrently from multiple request handlers.
pub trait Model: Send + Sync + 'static {
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;

    fn descriptor(&self) -> ModelDescriptor;
}
