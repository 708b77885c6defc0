use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::classifier::{extract, CategoryModel, ClassifierError};
use crate::finance::{FinanceClient, FinanceError};
use crate::model_store::ModelStore;

/// Startup phases of the classification service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Loading,
    Training,
    Ready,
    Serving,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Training => "training",
            Self::Ready => "ready",
            Self::Serving => "serving",
        };
        f.write_str(name)
    }
}

/// How the serving model came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOrigin {
    /// Read back from the model store
    Loaded,
    /// Trained from a freshly fetched dataset
    Trained,
    /// Handed in by the caller
    Injected,
}

/// Fatal startup failures. The process cannot serve after any of these.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to fetch training dataset: {0}")]
    DatasetFetch(#[source] FinanceError),
    #[error("Training dataset is empty, categorize some transactions first")]
    EmptyDataset,
    #[error("Training failed: {0}")]
    Training(#[source] ClassifierError),
}

/// Façade that owns the trained model and answers classification requests.
///
/// The model is built once, before serving starts, and is never mutated afterwards.
/// Cloning the service or sharing it behind an `Arc` is cheap and needs no locking.
#[derive(Debug, Clone)]
pub struct ClassificationService {
    model: Arc<CategoryModel>,
    origin: ModelOrigin,
    startup: Startup,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<ClassificationService>();
    }
};

/// Every state the service passed through, oldest first. Never empty.
#[derive(Debug, Clone)]
struct Startup {
    path: Vec<ServiceState>,
}

impl Startup {
    fn new() -> Self {
        Self {
            path: vec![ServiceState::Uninitialized],
        }
    }

    fn state(&self) -> ServiceState {
        self.path.last().copied().unwrap_or(ServiceState::Uninitialized)
    }

    fn enter(&mut self, next: ServiceState) {
        info!("Classification service: {} -> {}", self.state(), next);
        self.path.push(next);
    }
}

impl ClassificationService {
    /// Brings the service up: load the persisted model or, on a cold start, fetch the
    /// categorized history from the finance app, train, and persist the result.
    ///
    /// Failing to persist a freshly trained model is logged and ignored; the next cold
    /// start will simply train again.
    ///
    /// # Errors
    /// * `DatasetFetch` if the finance app could not deliver the dataset
    /// * `EmptyDataset` if it delivered no categorized transactions
    /// * `Training` if the dataset could not be turned into a model
    pub async fn start(
        store: &ModelStore,
        client: &dyn FinanceClient,
    ) -> Result<Self, ServiceError> {
        let mut startup = Startup::new();

        startup.enter(ServiceState::Loading);
        let (model, origin) = match store.load() {
            Ok(model) => (model, ModelOrigin::Loaded),
            Err(e) => {
                warn!("Could not load model: {}", e);
                info!("Looks like we need to do some training...");
                startup.enter(ServiceState::Training);
                (Self::train_and_save(store, client).await?, ModelOrigin::Trained)
            }
        };

        Ok(Self::assemble(model, origin, startup))
    }

    async fn train_and_save(
        store: &ModelStore,
        client: &dyn FinanceClient,
    ) -> Result<CategoryModel, ServiceError> {
        let dataset = client.transactions_dataset().await.map_err(|e| {
            error!("Fetching training dataset failed: {}", e);
            ServiceError::DatasetFetch(e)
        })?;
        if dataset.is_empty() {
            error!("Finance app returned no categorized transactions");
            return Err(ServiceError::EmptyDataset);
        }
        info!("Training on {} categorized transactions", dataset.len());

        let model = CategoryModel::train(dataset).map_err(|e| match e {
            ClassifierError::EmptyDataset => ServiceError::EmptyDataset,
            other => ServiceError::Training(other),
        })?;
        info!("Training completed");

        if let Err(e) = store.save(&model) {
            warn!("Could not persist trained model to {:?}: {}", store.path(), e);
        }
        Ok(model)
    }

    /// Wraps an already built model, e.g. a test fixture
    pub fn from_model(model: CategoryModel) -> Self {
        Self::assemble(model, ModelOrigin::Injected, Startup::new())
    }

    fn assemble(model: CategoryModel, origin: ModelOrigin, mut startup: Startup) -> Self {
        startup.enter(ServiceState::Ready);
        info!("Learned categories: {:?}", model.info().category_labels);

        let mut service = Self {
            model: Arc::new(model),
            origin,
            startup,
        };
        service.startup.enter(ServiceState::Serving);
        service
    }

    pub fn state(&self) -> ServiceState {
        self.startup.state()
    }

    /// The states this service went through on its way to serving, oldest first
    pub fn startup_path(&self) -> &[ServiceState] {
        &self.startup.path
    }

    pub fn origin(&self) -> ModelOrigin {
        self.origin
    }

    /// The shared, read-only model
    pub fn model(&self) -> &Arc<CategoryModel> {
        &self.model
    }

    /// Predicts the category of a transaction description
    pub fn classify(&self, description: &str) -> Result<String, ClassifierError> {
        let bag = extract(description);
        let category = self.model.predict(&bag)?;
        debug!("Classified '{}' as '{}'", description, category);
        Ok(category)
    }
}
