use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use refundly::api::validation::validate_session_secret;
use refundly::config::Config;
use refundly::identity::HttpIdentityProvider;
use refundly::storage::UploadStore;
use refundly::AppState;

#[derive(Parser, Debug)]
#[command(name = "refundly")]
#[command(author, version, about = "Refund claim submission and management service", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "refundly.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reset an admin account's password and exit
    ResetAdminPassword {
        /// Admin username
        #[arg(short, long, default_value = refundly::db::DEFAULT_ADMIN_USERNAME)]
        username: String,

        /// New password
        #[arg(short, long)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Refundly v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    std::fs::create_dir_all(&config.server.data_dir)?;

    // Initialize database
    let db = refundly::db::init(&config.server.data_dir).await?;

    if let Some(Commands::ResetAdminPassword { username, password }) = cli.command {
        return reset_admin_password(&db, &username, &password).await;
    }

    // A weak session secret makes every session token forgeable offline.
    if let Err(reason) = validate_session_secret(&config.auth.session_secret) {
        if cfg!(debug_assertions) {
            tracing::warn!("Session secret is weak ({}); acceptable for development only", reason);
        } else {
            anyhow::bail!("Refusing to start: session secret is weak ({})", reason);
        }
    }

    // Ensure default admin user exists
    refundly::db::ensure_admin_user(
        &db,
        &config.auth.admin_username,
        config.auth.admin_password.as_deref(),
    )
    .await?;

    // Identity provider (optional: auth endpoints return errors without it)
    let identity = match HttpIdentityProvider::new(&config.identity)? {
        Some(provider) => {
            tracing::info!("External identity provider configured");
            Some(Arc::new(provider) as Arc<dyn refundly::identity::IdentityProvider>)
        }
        None => {
            tracing::warn!("No identity provider configured; login and registration are disabled");
            None
        }
    };

    // Upload storage
    let uploads = UploadStore::new(&config.server.data_dir, config.uploads.max_size_bytes)?;

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), db.clone(), identity, uploads));

    // Purge expired sessions hourly
    {
        let db = db.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                match refundly::db::Session::purge_expired(&db).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Purged {} expired sessions", n),
                    Err(e) => tracing::warn!("Session purge failed: {}", e),
                }
            }
        });
    }

    let app = refundly::api::create_router(state);

    // Start API server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn reset_admin_password(db: &refundly::DbPool, username: &str, password: &str) -> Result<()> {
    use refundly::api::auth::hash_password;
    use refundly::api::validation::validate_password_strength;
    use refundly::db::AdminUser;

    if let Err(e) = validate_password_strength(password) {
        anyhow::bail!("{}", e);
    }

    let hash = hash_password(password)?;
    if AdminUser::set_password_hash(db, username, &hash).await? {
        tracing::info!("Password reset for admin '{}'", username);
        Ok(())
    } else {
        anyhow::bail!("No admin account named '{}'", username)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
