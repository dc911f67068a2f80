use std::sync::Arc;
use tracing::{error, info, warn};

mod backend;
mod bus;
mod content;
mod conversation;
mod delivery;
mod http;
mod inbox;
mod message;
mod poller;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Estuary daemon starting...");

    // Initialize the EventBus
    let bus = Arc::new(bus::EventBus::new());

    // Initialize the Store
    // We use ~/.estuary/estuary.db unless ESTUARY_DB points elsewhere
    let db_path = match std::env::var("ESTUARY_DB") {
        Ok(path) => std::path::PathBuf::from(path),
        Err(_) => {
            let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            std::path::Path::new(&home_dir)
                .join(".estuary")
                .join("estuary.db")
        }
    };

    info!("Initializing store at {}", db_path.display());
    let store = store::Store::new(&db_path).await?;
    store.init().await?;

    // Pick the data source. The sample backend serves demo data only and has
    // to be asked for explicitly; it is never a silent fallback.
    let backend: Arc<dyn backend::ConversationBackend> = if std::env::var("ESTUARY_SAMPLE_BACKEND")
        .map(|v| v == "1")
        .unwrap_or(false)
    {
        warn!("ESTUARY_SAMPLE_BACKEND=1: serving deterministic demo data");
        Arc::new(backend::sample::SampleBackend::new())
    } else {
        let base_url = std::env::var("ESTUARY_BACKEND_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into());
        info!("Using conversations backend at {}", base_url);
        Arc::new(backend::http::HttpBackend::new(base_url)?)
    };

    // Initialize the inbox engine
    let inbox = Arc::new(inbox::Inbox::new(
        backend,
        bus.clone(),
        store.clone(),
        delivery::DeliveryTuning::default(),
    ));

    // Spawn the conversation list poller in the background
    let poll_secs: u64 = std::env::var("ESTUARY_POLL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);
    let poller = poller::ListPoller::new(
        inbox.clone(),
        std::time::Duration::from_secs(poll_secs),
    );
    let poller_handle = tokio::spawn(async move {
        info!("Starting conversation poller ({}s interval)...", poll_secs);
        poller.run().await;
    });

    // HTTP + SSE surface
    let app = http::router(inbox, bus);

    let port: u16 = std::env::var("ESTUARY_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    info!("Starting HTTP surface on port {}", port);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    // Run the poller and the web server until one of them stops
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = poller_handle => {
            error!("Conversation poller stopped unexpectedly");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
