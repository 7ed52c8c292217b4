//! Host process for the adapter: one JSON message per stdin line in, one
//! JSON response per requested operation on stdout.

use std::path::PathBuf;

use anyhow::Result;
use ble_message_adapter::core::bluetooth::BluestRadio;
use ble_message_adapter::core::message::HostMessage;
use ble_message_adapter::{logging, AdapterConfig, Dispatcher};
use log::{error, info, Level};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const DEFAULT_CONFIG_FILE: &str = "adapter_config.json";

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logging::init(Level::Info) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = AdapterConfig::load_or_create(&config_path).await?;

    info!("Initializing bluetooth radio...");
    let radio = BluestRadio::new().await?;
    let adapter = Dispatcher::spawn(radio, config)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted.");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let request = match HostMessage::from_json(&line) {
            Ok(request) => request,
            Err(e) => {
                error!("Rejected message: {}", e);
                let rejection = serde_json::json!({ "error": e.to_string() });
                stdout.write_all(format!("{rejection}\n").as_bytes()).await?;
                stdout.flush().await?;
                continue;
            }
        };

        let mut responses = adapter.dispatch(request).await?;
        while let Some(response) = responses.recv().await {
            stdout
                .write_all(format!("{}\n", response.to_json()).as_bytes())
                .await?;
            stdout.flush().await?;
        }
    }

    adapter.destroy().await;
    info!("Shut down.");
    Ok(())
}
