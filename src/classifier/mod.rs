//! Bag-of-words category classifier: feature extraction, training, prediction and
//! the persisted blob format.

mod builder;
mod error;
pub mod features;
mod model;

pub use builder::{CategoryModelBuilder, TrainingDataset, TrainingExample};
pub use error::ClassifierError;
pub use features::{extract, FeatureBag};
pub use model::{CategoryModel, ModelInfo, DEFAULT_SMOOTHING, FORMAT_VERSION};
