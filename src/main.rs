use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let http_port = std::env::var("SMARTNEST_HTTP_PORT").unwrap_or_else(|_| "8088".to_string());
    let data_folder = std::env::var("SMARTNEST_DATA_FOLDER").unwrap_or_else(|_| "data".to_string());
    info!(
        target: "smartnest",
        "SmartNest starting: RUST_LOG='{}', http_port={}, data_root='{}'",
        rust_log, http_port, data_folder
    );

    let port: u16 = http_port.parse().unwrap_or(8088);
    smartnest::server::run_with_ports(port, &data_folder).await
}
