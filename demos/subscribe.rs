use std::env;
use std::sync::Arc;
use tcabci_read_client::message::Inbound;
use tcabci_read_client::websocket::{CloseEvent, ConnectionOptions, ErrorEvent, OpenEvent};
use tcabci_read_client::ReadClient;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Sets up logging, honoring RUST_LOG
fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_line_number(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();
    dotenv::dotenv().ok();

    let address = env::var("TCABCI_READ_NODE_ADDRESS")
        .unwrap_or_else(|_| "wss://read-node-01.transferchain.io/ws".to_string());
    let addrs: Vec<String> = env::var("TCABCI_SUBSCRIBE_ADDRS")
        .map_err(|_| anyhow::anyhow!("TCABCI_SUBSCRIBE_ADDRS must be set"))?
        .split(',')
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .collect();
    let tx_types: Vec<String> = env::var("TCABCI_TX_TYPES")
        .map(|types| types.split(',').map(|t| t.trim().to_string()).collect())
        .unwrap_or_default();

    info!("Using read node: {}", address);

    let client = ReadClient::new(ConnectionOptions::new(address))?;
    client
        .set_listen_callback(Arc::new(|message: Inbound| match message {
            Inbound::Json(value) => info!("Transaction: {}", value),
            other => info!("Received: {:?}", other),
        }))
        .set_open_callback(Arc::new(|event: &OpenEvent| info!("Connected to {}", event.url)))
        .set_error_callback(Arc::new(|event: &ErrorEvent| {
            if event.fatal {
                error!("Giving up: {}", event.message);
            } else {
                warn!("Socket error: {}", event.message);
            }
        }))
        .set_close_callback(Arc::new(|event: &CloseEvent| {
            warn!(
                "Connection closed with code {} (reconnecting: {})",
                event.code, event.will_reconnect
            )
        }));

    client.start().await?;
    let added = client.subscribe(&addrs, None, &tx_types)?;
    info!("Subscribed to {} addresses: {:?}", added.len(), added);
    info!("Status: {}", serde_json::to_string(&client.status())?);

    info!("Listening, press ctrl+c to stop...");
    tokio::signal::ctrl_c().await?;

    client.unsubscribe()?;
    client.stop(1000).await?;
    info!("Done.");
    Ok(())
}
