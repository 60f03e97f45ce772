use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nfc_agent::certs;
use nfc_agent::config::Config;
use nfc_agent::http;
use nfc_agent::listener;
use nfc_agent::logring::{Category, LogRing};
use nfc_agent::state::AppState;
use nfc_agent::ws::envelope::event_message;
use nfc_agent::ws::hub::Hub;

use nfc_agent_proxmark::{LabConfig, LabExecutor};
use nfc_agent_tags::CardService;

#[derive(Parser, Debug)]
#[command(about = "Local agent brokering access to attached NFC readers")]
struct Cli {
    /// Host to bind, overriding NFC_AGENT_HOST
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port to bind, overriding NFC_AGENT_PORT
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Cli::parse();
    let mut config = Config::load();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let lab = config.proxmark.enabled.then(|| {
        LabExecutor::new(LabConfig {
            binary_path: config
                .proxmark
                .path
                .clone()
                .unwrap_or_else(|| "pm3".to_string()),
            port: config.proxmark.port.clone(),
            idle_timeout: config.proxmark.idle_timeout,
            persistent: config.proxmark.persistent,
            ..Default::default()
        })
    });

    let service = CardService::new(lab);
    let hub = Hub::new();
    let logs = Arc::new(LogRing::default());

    // Ring appends at info and above fan out to streaming sessions.
    let broadcast_hub = Arc::clone(&hub);
    logs.set_broadcast(Box::new(move |entry| {
        broadcast_hub.broadcast(&event_message("log", serde_json::json!(entry)));
    }));

    let tls_config = match certs::default_certs_dir() {
        Some(dir) => match certs::load_or_generate(&dir) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(error = %e, "credential store unavailable, serving plaintext only");
                None
            }
        },
        None => {
            warn!("no user config directory, serving plaintext only");
            None
        }
    };

    let state = AppState {
        service,
        hub,
        logs: Arc::clone(&logs),
    };
    let router = http::router(state);

    let addr = config.address();
    logs.info(
        Category::System,
        "agent started",
        Some(serde_json::json!({ "address": addr })),
    );
    info!(version = env!("CARGO_PKG_VERSION"), "nfc-agent starting");

    listener::run(&addr, router, tls_config).await
}
