mod auth;
mod db_core;
mod error;
mod model;
mod prompt;
mod rate_limiters;
mod request_tracing;
mod routes;
mod server_config;
#[cfg(test)]
mod testing;

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use auth::JwtKeys;
use axum::extract::FromRef;
use mimalloc::MiMalloc;
use model::{
    email_summary::{DbSummaryStore, SummaryStore},
    user::{DbUserStore, UserStore},
};
use prompt::{GeminiClient, TextGenerator};
use rate_limiters::RateLimiters;
use routes::AppRouter;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use server_config::{AuthMode, ServerConfig};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub generator: Arc<dyn TextGenerator>,
    pub jwt_keys: JwtKeys,
    pub users: Option<Arc<dyn UserStore>>,
    pub summaries: Option<Arc<dyn SummaryStore>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ServerConfig::load().context("Failed to load configuration")?;

    init_tracing(config.server.log_json);
    tracing::info!("{}", config);

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
    let api_key = env::var("GEMINI_API_KEY").ok();
    let gemini = GeminiClient::new(
        http_client,
        api_key,
        config.model.clone(),
        RateLimiters::from_config(&config.prompt_limits),
    );
    if !gemini.has_api_key() {
        tracing::warn!("GEMINI_API_KEY is not set, every analysis will use the fallback");
    }

    let jwt_keys = load_jwt_keys(&config)?;

    let (users, summaries) = match env::var("DATABASE_URL") {
        Ok(db_url) => {
            let conn = connect_db(db_url).await?;
            let users: Arc<dyn UserStore> = Arc::new(DbUserStore::new(conn.clone()));
            let summaries: Arc<dyn SummaryStore> = Arc::new(DbSummaryStore::new(conn));
            (Some(users), Some(summaries))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL is not set, accounts and saved summaries are disabled");
            (None, None)
        }
    };

    let port = config.server.port;
    let state = ServerState {
        config: Arc::new(config),
        generator: Arc::new(gemini),
        jwt_keys,
        users,
        summaries,
    };

    let router = AppRouter::create(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Inbox Unclutter server running on http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Server shut down");
    Ok(())
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
            .init();
    }
}

/// Tokens can only be verified across restarts with a stable `JWT_SECRET`.
/// With auth disabled a throwaway key is enough.
fn load_jwt_keys(config: &ServerConfig) -> anyhow::Result<JwtKeys> {
    let ttl = config.auth.token_ttl_secs;
    match env::var("JWT_SECRET") {
        Ok(secret) => JwtKeys::from_hex_secret(&secret, ttl),
        Err(_) if config.auth.mode == AuthMode::Disabled => {
            let secret = [Uuid::new_v4().into_bytes(), Uuid::new_v4().into_bytes()].concat();
            Ok(JwtKeys::new(&secret, ttl))
        }
        Err(_) => anyhow::bail!(
            "JWT_SECRET must be set when auth mode is {}",
            config.auth.mode
        ),
    }
}

async fn connect_db(db_url: String) -> anyhow::Result<DatabaseConnection> {
    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);

    let conn = Database::connect(db_options)
        .await
        .context("Database connection failed")?;
    tracing::info!("Connected to database");
    Ok(conn)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
