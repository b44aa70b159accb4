use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use relay_auth::{AuthService, EmailGateway, HttpEmailGateway, NoopEmailGateway};
use relay_cleanup::CleanupEngine;
use relay_conversations::ConversationManager;
use relay_core::config::RelayConfig;
use relay_ephemeral::MemoryEphemeral;
use relay_messages::MessageStore;
use relay_pipeline::{MessagePipeline, MessageProcessor};
use relay_presence::ConnectionManager;
use relay_receipts::ReceiptService;
use relay_search::SearchService;
use relay_tokens::TokenService;
use relay_users::UserStore;
use rusqlite::Connection;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

mod app;
mod http;
mod ws;

/// Capacity of the pipeline → distribution handler channel.
const DISTRIBUTION_BUFFER: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "relay-gateway", about = "Relay chat platform gateway")]
struct Args {
    /// Path to relay.toml (default: ~/.relay/relay.toml)
    #[arg(long)]
    config: Option<String>,
    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,
    /// Override the configured bind address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_gateway=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = RelayConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({}), using defaults", e);
        RelayConfig::default()
    });
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    if let Some(bind) = args.bind {
        config.gateway.bind = bind;
    }
    let instance_id = relay_core::config::instance_id();

    // stores: users and conversations share the relational database,
    // messages live in their own
    let user_conn = open_store(&config.database.path)?;
    relay_users::db::init_db(&user_conn)?;
    let conv_conn = open_store(&config.database.path)?;
    relay_conversations::db::init_db(&conv_conn)?;
    let msg_conn = open_store(&config.database.messages_path)?;
    relay_messages::db::init_db(&msg_conn)?;

    let ephemeral = Arc::new(MemoryEphemeral::new());
    let users = Arc::new(UserStore::new(user_conn));
    let conversations = Arc::new(ConversationManager::new(conv_conn, users.clone()));
    let messages = Arc::new(MessageStore::new(msg_conn));
    let tokens = Arc::new(TokenService::new(&config.token, ephemeral.clone()));

    let email: Arc<dyn EmailGateway> = match HttpEmailGateway::from_config(&config.email) {
        Some(gateway) => Arc::new(gateway),
        None => {
            warn!("no email endpoint configured, password reset mails are logged only");
            Arc::new(NoopEmailGateway)
        }
    };
    let auth = Arc::new(AuthService::new(
        users.clone(),
        tokens.clone(),
        ephemeral.clone(),
        email,
        &config.reset,
        Duration::from_secs(config.email.timeout_secs),
    ));
    let receipts = Arc::new(ReceiptService::new(messages.clone(), conversations.clone()));
    let search = Arc::new(SearchService::new(messages.clone(), conversations.clone()));
    let connections = Arc::new(ConnectionManager::new(instance_id.clone(), ephemeral));

    // pipeline, distribution, cleanup
    let (dist_tx, dist_rx) = mpsc::channel(DISTRIBUTION_BUFFER);
    let processor = Arc::new(MessageProcessor::new(
        conversations.clone(),
        messages.clone(),
        dist_tx,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (pipeline, pipeline_worker) = MessagePipeline::spawn(
        config.pipeline.queue_capacity,
        processor,
        shutdown_rx.clone(),
        Duration::from_secs(config.pipeline.drain_deadline_secs),
    );

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState {
        config,
        instance_id: instance_id.clone(),
        users,
        conversations: conversations.clone(),
        messages: messages.clone(),
        receipts,
        search,
        auth,
        tokens,
        connections,
        pipeline,
    });

    tokio::spawn(ws::distribution::run_distribution(dist_rx, state.clone()));

    let cleanup = CleanupEngine::new(
        conversations,
        messages,
        state.config.cleanup.retention_days,
        Duration::from_secs(state.config.cleanup.interval_secs),
    );
    let cleanup_task = tokio::spawn(cleanup.run(shutdown_rx));

    let router = app::build_router(state.clone());
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, instance = %instance_id, "relay gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // teardown order: stop intake, drain the pipeline, stop the reconciler
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = pipeline_worker.await;
    let _ = cleanup_task.await;
    info!("goodbye");
    Ok(())
}

/// Open a SQLite store, creating parent directories on first run. The
/// busy timeout matches the store deadline policy.
fn open_store(path: &str) -> anyhow::Result<Connection> {
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
