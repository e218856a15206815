use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use clap::Parser;
use radix_object_store::config::{Cli, Command, DatanodeArgs, NamenodeArgs};
use radix_object_store::directory::NodeDirectory;
use radix_object_store::directory::handlers::{handle_health, handle_register};
use radix_object_store::directory::health::HealthMonitor;
use radix_object_store::directory::memory::MemoryDirectory;
use radix_object_store::directory::protocol::{
    ENDPOINT_HEALTH, ENDPOINT_REGISTER, RegisterRequest, RegisterResponse,
};
use radix_object_store::directory::remote::RedisDirectory;
use radix_object_store::directory::types::{NodeId, NodeInfo};
use radix_object_store::index::NamespaceIndex;
use radix_object_store::lock::memory::MemoryLockBackend;
use radix_object_store::lock::remote::RedisLockBackend;
use radix_object_store::lock::{LockBackend, LockPool};
use radix_object_store::metrics::{ENDPOINT_METRICS, handle_metrics};
use radix_object_store::store::RecordStore;
use radix_object_store::store::http::HttpRecordStore;
use radix_object_store::store::local::LocalStore;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const REGISTER_ATTEMPTS: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Namenode(args) => run_namenode(args).await,
        Command::Datanode(args) => run_datanode(args).await,
    }
}

async fn run_namenode(args: NamenodeArgs) -> anyhow::Result<()> {
    tracing::info!("Starting namenode on {}", args.bind);

    // 1. Coordination store (locks + node directory):
    let (backend, directory): (Arc<dyn LockBackend>, Arc<dyn NodeDirectory>) = match &args.redis {
        Some(url) => {
            tracing::info!("Using coordination store at {}", url);
            let client = redis::Client::open(url.as_str())?;
            let directory: Arc<dyn NodeDirectory> =
                Arc::new(RedisDirectory::connect(&client).await?);
            let backend: Arc<dyn LockBackend> = Arc::new(RedisLockBackend::connect(client).await?);
            (backend, directory)
        }
        None => {
            tracing::warn!("No --redis given: locks and node directory are process-local");
            let backend: Arc<dyn LockBackend> = Arc::new(MemoryLockBackend::new());
            let directory: Arc<dyn NodeDirectory> = Arc::new(MemoryDirectory::new());
            (backend, directory)
        }
    };

    // 2. Namespace index:
    let store: Arc<dyn RecordStore> = Arc::new(HttpRecordStore::new(directory.clone()));
    let locks = Arc::new(LockPool::new(backend, args.lock_config()));
    let index = Arc::new(NamespaceIndex::new(
        args.index_config(),
        directory.clone(),
        store,
        locks,
    ));

    // 3. Health monitor:
    if args.health_interval_secs > 0 {
        HealthMonitor::new(
            directory.clone(),
            Duration::from_secs(args.health_interval_secs),
        )
        .start();
    }

    // 4. Metrics:
    let metrics = radix_object_store::metrics::init();

    // 5. HTTP Router:
    let app = radix_object_store::index::handlers::routes()
        .route(ENDPOINT_REGISTER, post(handle_register))
        .route(ENDPOINT_HEALTH, get(handle_health))
        .route(ENDPOINT_METRICS, get(handle_metrics))
        .layer(Extension(index))
        .layer(Extension(directory))
        .layer(Extension(metrics));

    tracing::info!("Object API listening on {}", args.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_datanode(args: DatanodeArgs) -> anyhow::Result<()> {
    let node_id = args.id.clone().map(NodeId).unwrap_or_default();
    let advertise = args
        .advertise
        .clone()
        .unwrap_or_else(|| args.bind.to_string());

    tracing::info!("Starting datanode {} on {}", node_id, args.bind);

    let local = Arc::new(LocalStore::new());
    let app: Router = radix_object_store::store::handlers::router(local);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;

    // Register once the listener is bound, so the namenode's first probe succeeds.
    if let Some(namenode) = args.namenode.clone() {
        let node = NodeInfo {
            id: node_id.clone(),
            host: advertise,
        };
        tokio::spawn(async move {
            if let Err(e) = register_with_retry(&namenode, node).await {
                tracing::error!("Giving up on registration with {}: {}", namenode, e);
            }
        });
    } else {
        tracing::warn!("No --namenode given: this node must be registered externally");
    }

    tracing::info!("Storage service listening on {}", args.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn register_with_retry(namenode: &str, node: NodeInfo) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let url = format!("http://{}{}", namenode, ENDPOINT_REGISTER);
    let request = RegisterRequest { node };

    let mut delay_ms = 150u64;
    let mut attempt = 0;

    loop {
        let result = client
            .post(&url)
            .json(&request)
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        let error = match result {
            Ok(resp) if resp.status().is_success() => {
                let body: RegisterResponse = resp.json().await?;
                if body.success {
                    tracing::info!("Registered {} with namenode {}", request.node.id, namenode);
                    return Ok(());
                }
                anyhow::anyhow!("namenode refused registration")
            }
            Ok(resp) => anyhow::anyhow!("namenode answered {}", resp.status()),
            Err(e) => e.into(),
        };

        attempt += 1;
        if attempt >= REGISTER_ATTEMPTS {
            return Err(error);
        }
        tracing::warn!("Registration attempt {} failed: {}", attempt, error);

        let jitter = rand::random::<u64>() % 50;
        tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
        delay_ms = (delay_ms * 2).min(1200);
    }
}
