use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let listen_host = std::env::var("STOREGATE_LISTEN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let listen_port = std::env::var("STOREGATE_LISTEN_PORT").unwrap_or_else(|_| "7878".to_string());
    let db_path =
        std::env::var("STOREGATE_DATABASE_PATH").unwrap_or_else(|_| "data/storegate.db".to_string());
    info!(
        target: "storegate",
        "storegate starting: RUST_LOG='{}', listen={}:{}, db='{}'",
        rust_log, listen_host, listen_port, db_path
    );

    storegate::server::run().await
}
