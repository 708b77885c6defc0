use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use super::{FinanceClient, FinanceError};
use crate::classifier::{TrainingDataset, TrainingExample};
use crate::config::AppConfig;

const API_ACCEPT: &str = "application/vnd.api+json";

#[derive(Debug, Deserialize)]
struct TransactionPage {
    #[serde(default)]
    data: Vec<TransactionGroup>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct TransactionGroup {
    attributes: GroupAttributes,
}

#[derive(Debug, Deserialize)]
struct GroupAttributes {
    #[serde(default)]
    transactions: Vec<Split>,
}

#[derive(Debug, Deserialize)]
struct Split {
    #[serde(default)]
    description: String,
    #[serde(default)]
    category_name: Option<String>,
}

impl TransactionPage {
    /// Categorized splits of this page. Splits without a category or a description
    /// teach nothing and are skipped.
    fn training_examples(&self) -> impl Iterator<Item = TrainingExample> + '_ {
        self.data
            .iter()
            .flat_map(|group| group.attributes.transactions.iter())
            .filter_map(|split| {
                let category = split.category_name.as_deref()?.trim();
                let description = split.description.trim();
                if category.is_empty() || description.is_empty() {
                    return None;
                }
                Some(TrainingExample::new(category, description))
            })
    }
}

/// REST client for the Firefly III API
#[derive(Debug, Clone)]
pub struct FireflyClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl FireflyClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FinanceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    /// # Errors
    /// * `Config` if the Firefly settings are absent
    pub fn from_config(config: &AppConfig) -> Result<Self, FinanceError> {
        let firefly = config.firefly()?;
        Self::new(&firefly.app_url, &firefly.api_key, config.http_timeout)
    }

    async fn fetch_page(&self, page: u32) -> Result<TransactionPage, FinanceError> {
        let url = format!("{}/api/v1/transactions", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("page", page)])
            .bearer_auth(&self.api_key)
            .header(ACCEPT, API_ACCEPT)
            .send()
            .await?;
        let body = Self::checked_body(response).await?;
        serde_json::from_str(&body)
            .map_err(|e| FinanceError::Decode(format!("transactions page {}: {}", page, e)))
    }

    async fn checked_body(response: reqwest::Response) -> Result<String, FinanceError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::error!("Firefly request failed with {}: {}", status, body);
            return Err(FinanceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl FinanceClient for FireflyClient {
    async fn transactions_dataset(&self) -> Result<TrainingDataset, FinanceError> {
        let mut dataset = TrainingDataset::new();
        let mut page = 1;
        loop {
            let result = self.fetch_page(page).await?;
            let before = dataset.len();
            dataset.extend(result.training_examples());
            let total_pages = result.meta.pagination.total_pages;
            log::info!(
                "Fetched transactions page {}/{}: {} categorized splits",
                page,
                total_pages.max(1),
                dataset.len() - before
            );
            if page >= total_pages {
                break;
            }
            page += 1;
        }
        log::debug!("Dataset: {:?}", dataset);
        Ok(dataset)
    }

    async fn update_transaction_category(
        &self,
        transaction_id: u64,
        journal_id: u64,
        category: &str,
    ) -> Result<(), FinanceError> {
        let url = format!("{}/api/v1/transactions/{}", self.base_url, transaction_id);
        let body = json!({
            "apply_rules": true,
            "fire_webhooks": true,
            "transactions": [{
                "transaction_journal_id": journal_id.to_string(),
                "category_name": category,
            }],
        });
        log::info!(
            "Setting category '{}' on transaction {} (journal {})",
            category,
            transaction_id,
            journal_id
        );
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, API_ACCEPT)
            .json(&body)
            .send()
            .await?;
        Self::checked_body(response).await?;
        Ok(())
    }
}

/// Builds its [`FireflyClient`] on first use, so starting from a persisted model
/// needs no Firefly settings at all.
pub struct LazyFireflyClient {
    config: AppConfig,
    client: OnceCell<FireflyClient>,
}

impl LazyFireflyClient {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.initialized()
    }

    async fn client(&self) -> Result<&FireflyClient, FinanceError> {
        self.client
            .get_or_try_init(|| async {
                let client = FireflyClient::from_config(&self.config)?;
                log::info!("Firefly client ready for {}", client.base_url);
                Ok(client)
            })
            .await
    }
}

#[async_trait]
impl FinanceClient for LazyFireflyClient {
    async fn transactions_dataset(&self) -> Result<TrainingDataset, FinanceError> {
        self.client().await?.transactions_dataset().await
    }

    async fn update_transaction_category(
        &self,
        transaction_id: u64,
        journal_id: u64,
        category: &str,
    ) -> Result<(), FinanceError> {
        self.client()
            .await?
            .update_transaction_category(transaction_id, journal_id, category)
            .await
    }
}
