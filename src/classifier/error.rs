/// Represents the different types of errors that can occur in the category classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// Training was attempted without a single example
    #[error("Training dataset is empty")]
    EmptyDataset,
    /// Prediction was requested from a model that knows no categories
    #[error("Model has no learned categories")]
    UntrainedModel,
    /// A serialized model blob was malformed, tampered with or written by another format version
    #[error("Corrupt model: {0}")]
    CorruptModel(String),
    /// Error occurred due to invalid input parameters
    #[error("Validation error: {0}")]
    ValidationError(String),
}
