//! Contract between the classifier and the personal-finance application.

mod firefly;

pub use firefly::{FireflyClient, LazyFireflyClient};

use async_trait::async_trait;

use crate::classifier::TrainingDataset;
use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum FinanceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Finance app answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Finance app is not configured: {0}")]
    Config(#[from] ConfigError),
}

/// Operations the classifier needs from the finance application.
#[async_trait]
pub trait FinanceClient: Send + Sync {
    /// Every categorized transaction, as `(category, description)` training examples
    async fn transactions_dataset(&self) -> Result<TrainingDataset, FinanceError>;

    /// Assigns `category` to one split (`journal_id`) of a transaction
    async fn update_transaction_category(
        &self,
        transaction_id: u64,
        journal_id: u64,
        category: &str,
    ) -> Result<(), FinanceError>;
}
