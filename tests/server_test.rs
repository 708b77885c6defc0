use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use txcat::server::{self, CLASSIFY_ROUTE};
use txcat::{
    ClassificationService, FinanceClient, FinanceError, ModelStore, TrainingDataset,
    TrainingExample, WebhookHandler,
};

/// Serves a fixed training set and records category updates
#[derive(Default)]
struct FireflyDouble {
    fetches: AtomicUsize,
    updates: Mutex<Vec<(u64, u64, String)>>,
}

#[async_trait]
impl FinanceClient for FireflyDouble {
    async fn transactions_dataset(&self) -> Result<TrainingDataset, FinanceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            TrainingExample::new("Groceries", "WALMART #123"),
            TrainingExample::new("Groceries", "TRADER JOES"),
            TrainingExample::new("Utilities", "CITY POWER CO"),
        ])
    }

    async fn update_transaction_category(
        &self,
        transaction_id: u64,
        journal_id: u64,
        category: &str,
    ) -> Result<(), FinanceError> {
        self.updates
            .lock()
            .unwrap()
            .push((transaction_id, journal_id, category.to_string()));
        Ok(())
    }
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

async fn start_server(handler: Arc<WebhookHandler>) -> RunningServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, stop) = oneshot::channel::<()>();
    let task = tokio::spawn(server::serve(listener, handler, async move {
        let _ = stop.await;
    }));
    RunningServer { addr, shutdown, task }
}

fn store_transaction(id: u64, journal_id: u64, description: &str) -> String {
    serde_json::json!({
        "trigger": "STORE_TRANSACTION",
        "content": {
            "id": id,
            "transactions": [
                {"transaction_journal_id": journal_id, "description": description, "category_name": null}
            ]
        }
    })
    .to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_webhooks_share_one_model() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = ModelStore::new(dir.path().join("model.bin"));
    let firefly = Arc::new(FireflyDouble::default());

    let service = ClassificationService::start(&store, firefly.as_ref()).await?;
    let handler = Arc::new(WebhookHandler::new(Arc::new(service), firefly.clone()));
    let server = start_server(handler).await;

    let http = reqwest::Client::new();
    let url = format!("http://{}{}", server.addr, CLASSIFY_ROUTE);
    let (first, second) = tokio::join!(
        http.post(&url).body(store_transaction(1, 11, "WALMART SUPERCENTER")).send(),
        http.post(&url).body(store_transaction(2, 21, "City Power Co - April")).send(),
    );
    let (first, second) = (first?, second?);
    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(second.status().as_u16(), 200);

    let first: serde_json::Value = first.json().await?;
    let second: serde_json::Value = second.json().await?;
    assert_eq!(first[0]["category"], "Groceries");
    assert_eq!(second[0]["category"], "Utilities");

    assert_eq!(firefly.fetches.load(Ordering::SeqCst), 1);
    let mut updates = firefly.updates.lock().unwrap().clone();
    updates.sort();
    assert_eq!(
        updates,
        vec![
            (1, 11, "Groceries".to_string()),
            (2, 21, "Utilities".to_string()),
        ]
    );

    server.shutdown.send(()).ok();
    server.task.await??;
    Ok(())
}

#[tokio::test]
async fn test_error_statuses() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = ModelStore::new(dir.path().join("model.bin"));
    let firefly = Arc::new(FireflyDouble::default());
    let service = ClassificationService::start(&store, firefly.as_ref()).await?;
    let server = start_server(Arc::new(WebhookHandler::new(Arc::new(service), firefly.clone()))).await;

    let http = reqwest::Client::new();
    let base = format!("http://{}", server.addr);

    let malformed = http
        .post(format!("{}{}", base, CLASSIFY_ROUTE))
        .body("{not json")
        .send()
        .await?;
    assert_eq!(malformed.status().as_u16(), 400);

    let wrong_method = http.get(format!("{}{}", base, CLASSIFY_ROUTE)).send().await?;
    assert_eq!(wrong_method.status().as_u16(), 405);

    let unknown = http.post(format!("{}/learn", base)).body("{}").send().await?;
    assert_eq!(unknown.status().as_u16(), 404);

    let health: serde_json::Value = http
        .get(format!("{}{}", base, server::HEALTH_ROUTE))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health["state"], "serving");

    assert!(firefly.updates.lock().unwrap().is_empty());
    server.shutdown.send(()).ok();
    server.task.await??;
    Ok(())
}
