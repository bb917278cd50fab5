use anyhow::{Context, Result};
use clap::Parser;
use dialog_relay::dialogflow::{CredentialSearch, Credentials, DialogflowConnector};
use dialog_relay::{create_router, AppState, Config, SharedConversationClient};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dialog-relay")]
#[command(about = "HTTP relay for text and voice messages to a Dialogflow CX agent")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/dialog-relay")]
    config: String,

    /// Override service.http.bind
    #[arg(long)]
    bind: Option<String>,

    /// Override service.http.port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dialog_relay=debug")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        cfg.service.http.bind = bind;
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!(
        "Agent: projects/{}/locations/{}/agents/{} (language {})",
        cfg.dialogflow.project_id,
        cfg.dialogflow.location,
        cfg.dialogflow.agent_id,
        cfg.dialogflow.language_code
    );

    // Refuse to serve without credentials
    let credentials = Credentials::resolve(&CredentialSearch::from_environment(&cfg.credentials))
        .await
        .context("Failed to resolve backend credentials")?;
    info!("Backend credentials: {}", credentials.describe());

    let connector = DialogflowConnector::new(cfg.dialogflow.clone(), cfg.audio.clone(), credentials);
    let state = AppState::new(SharedConversationClient::new(Box::new(connector)));
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
