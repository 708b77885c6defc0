//! Automatic budgeting categories for Firefly III transactions.
//!
//! A multinomial naive Bayes model learns from the user's already categorized
//! transaction history and predicts a category for new, uncategorized descriptions.
//!
//! # Basic Usage
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use txcat::{CategoryModel, ClassificationService, TrainingExample};
//!
//! let model = CategoryModel::train(vec![
//!     TrainingExample::new("Groceries", "WALMART #123"),
//!     TrainingExample::new("Groceries", "TRADER JOES"),
//!     TrainingExample::new("Utilities", "CITY POWER CO"),
//! ])?;
//!
//! let service = ClassificationService::from_model(model);
//! assert_eq!(service.classify("WALMART SUPERCENTER")?, "Groceries");
//! # Ok(())
//! # }
//! ```
//!
//! # Persistence
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use txcat::{CategoryModel, TrainingExample, extract};
//!
//! let model = CategoryModel::train(vec![TrainingExample::new("Rent", "LANDLORD LLC")])?;
//! let blob = model.serialize()?;
//! let restored = CategoryModel::deserialize(&blob)?;
//! assert_eq!(restored.predict(&extract("landlord"))?, "Rent");
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! After startup the model is read-only, so a service can be shared across tasks
//! with `Arc` and queried concurrently without locking. [`server::serve`] relies on
//! this to answer every webhook connection from one trained model.

pub mod classifier;
pub mod config;
pub mod finance;
pub mod model_store;
pub mod server;
pub mod service;
pub mod webhook;

pub use classifier::{
    extract, CategoryModel, CategoryModelBuilder, ClassifierError, FeatureBag, ModelInfo,
    TrainingDataset, TrainingExample,
};
pub use config::{AppConfig, ConfigError, FireflyConfig};
pub use finance::{FinanceClient, FinanceError, FireflyClient, LazyFireflyClient};
pub use model_store::{ModelStore, StoreError};
pub use service::{ClassificationService, ModelOrigin, ServiceError, ServiceState};
pub use webhook::{Categorized, WebhookError, WebhookHandler};

pub fn init_logger() {
    env_logger::init();
}
