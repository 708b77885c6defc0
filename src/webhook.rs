//! Handling of Firefly III "transaction created" webhooks.
//!
//! The handler only needs the raw request body; [`crate::server`] binds it to
//! `POST /classify`.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::classifier::ClassifierError;
use crate::finance::{FinanceClient, FinanceError};
use crate::service::ClassificationService;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Malformed webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifierError),
    #[error("Could not report category back: {0}")]
    Update(#[from] FinanceError),
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    content: TransactionGroup,
}

#[derive(Debug, Deserialize)]
struct TransactionGroup {
    #[serde(deserialize_with = "flexible_id")]
    id: u64,
    #[serde(default)]
    transactions: Vec<TransactionSplit>,
}

#[derive(Debug, Deserialize)]
struct TransactionSplit {
    #[serde(deserialize_with = "flexible_id")]
    transaction_journal_id: u64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category_name: Option<String>,
}

/// Firefly sends ids as numbers in webhooks and as strings in its REST API.
fn flexible_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(u64),
        Text(String),
    }

    match Id::deserialize(deserializer)? {
        Id::Number(n) => Ok(n),
        Id::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// A category assigned to one transaction split
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Categorized {
    pub transaction_id: u64,
    pub journal_id: u64,
    pub description: String,
    pub category: String,
}

/// Classifies newly created transactions and reports the category back to Firefly.
#[derive(Clone)]
pub struct WebhookHandler {
    service: Arc<ClassificationService>,
    client: Arc<dyn FinanceClient>,
}

impl WebhookHandler {
    pub fn new(service: Arc<ClassificationService>, client: Arc<dyn FinanceClient>) -> Self {
        Self { service, client }
    }

    pub fn service(&self) -> &Arc<ClassificationService> {
        &self.service
    }

    /// Handles the body of a "store transaction" webhook.
    ///
    /// Splits that already carry a category, or have no description, are left alone.
    /// Returns the categories that were assigned, in payload order.
    pub async fn handle_new_transaction(&self, body: &[u8]) -> Result<Vec<Categorized>, WebhookError> {
        let payload: WebhookPayload = serde_json::from_slice(body).map_err(|e| {
            log::error!("Rejecting webhook payload: {}", e);
            e
        })?;
        let group = payload.content;
        log::info!(
            "Webhook for transaction {} with {} split(s)",
            group.id,
            group.transactions.len()
        );

        let mut assigned = Vec::new();
        for split in group.transactions {
            let already = split.category_name.as_deref().map(str::trim).unwrap_or("");
            if !already.is_empty() {
                log::info!(
                    "Journal {} already categorized as '{}', skipping",
                    split.transaction_journal_id,
                    already
                );
                continue;
            }
            let description = split.description.trim();
            if description.is_empty() {
                log::warn!("Journal {} has no description, skipping", split.transaction_journal_id);
                continue;
            }

            let category = self.service.classify(description)?;
            self.client
                .update_transaction_category(group.id, split.transaction_journal_id, &category)
                .await?;
            log::info!("'{}' -> '{}'", description, category);

            assigned.push(Categorized {
                transaction_id: group.id,
                journal_id: split.transaction_journal_id,
                description: description.to_string(),
                category,
            });
        }
        Ok(assigned)
    }
}
