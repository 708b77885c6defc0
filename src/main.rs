use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use tokio::net::TcpListener;
use txcat::server::{self, DEFAULT_LISTEN_ADDR};
use txcat::{AppConfig, ClassificationService, LazyFireflyClient, ModelStore, WebhookHandler};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model file to load or create (defaults to $TXCAT_MODEL_PATH or the user data dir)
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,

    /// Discard any persisted model and train from scratch
    #[arg(short, long, global = true)]
    retrain: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load or train the model, then exit
    Bootstrap,
    /// Print the predicted category of a transaction description
    Classify {
        description: String,
    },
    /// Process a Firefly "store transaction" webhook body ("-" reads stdin)
    Webhook {
        payload: PathBuf,
    },
    /// Listen for Firefly webhooks on POST /classify until interrupted
    Serve {
        #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
        listen: String,
    },
}

fn read_payload(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut body = Vec::new();
        std::io::stdin()
            .read_to_end(&mut body)
            .context("reading webhook payload from stdin")?;
        return Ok(body);
    }
    std::fs::read(path).with_context(|| format!("reading webhook payload {:?}", path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("=== Firefly transaction categorizer ===");

    let mut config = AppConfig::from_env().context("loading configuration")?;
    if let Some(path) = args.model {
        config = config.with_model_path(path);
    }
    info!("Using configuration {:?}", config);

    let store = ModelStore::new(&config.model_path);
    // Only connects to Firefly on a cold start or when a category is reported back
    let client = Arc::new(LazyFireflyClient::new(config));

    if args.retrain {
        info!("Retrain requested - removing any persisted model...");
        store.remove().context("removing persisted model")?;
    }

    let start_time = Instant::now();
    let service = ClassificationService::start(&store, client.as_ref())
        .await
        .context("starting classification service")?;
    info!(
        "Service {} with {:?} model (took {:.2?})",
        service.state(),
        service.origin(),
        start_time.elapsed()
    );

    match args.command {
        Command::Bootstrap => {
            let model_info = service.model().info();
            println!(
                "Model ready: {} categories, {} tokens, {} training examples",
                model_info.num_categories, model_info.vocabulary_size, model_info.training_examples
            );
        }
        Command::Classify { description } => {
            let category = service.classify(&description)?;
            println!("{}", category);
        }
        Command::Webhook { payload } => {
            let body = read_payload(&payload)?;
            let handler = WebhookHandler::new(Arc::new(service), client);
            let assigned = handler.handle_new_transaction(&body).await?;
            println!("{}", serde_json::to_string_pretty(&assigned)?);
        }
        Command::Serve { listen } => {
            let listener = TcpListener::bind(&listen)
                .await
                .with_context(|| format!("binding {}", listen))?;
            let handler = Arc::new(WebhookHandler::new(Arc::new(service), client));
            server::serve(listener, handler, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Could not listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await
            .context("serving webhooks")?;
        }
    }

    Ok(())
}
