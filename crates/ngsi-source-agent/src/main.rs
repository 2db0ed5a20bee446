//! NGSI source agent binary.
//!
//! Wiring events are written to stdout as JSON lines
//! (`{"endpoint": "...", "payload": ...}`). Stdin carries one JSON document
//! per line: broker notifications forwarded by the notification proxy, or
//! host commands tagged by `event` (see [`ngsi_source_agent::input`]).

use anyhow::{Context, Result};
use ngsi_source_agent::{
    AgentConfig, ChannelWiring, Coordinator, CoordinatorHandle, CoordinatorSettings, HostEvent,
    InputLine,
};
use ngsi_source_adapter_ngsi::NgsiConnector;
use ngsi_source_core::SourceConfig;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries wiring events
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting NGSI source agent");

    let config = AgentConfig::from_env().context("Failed to load configuration")?;

    tracing::info!(
        server_url = %config.source.server_url,
        outputs = ?config.outputs,
        "Agent configured"
    );

    let (wiring, mut events) = ChannelWiring::new(&config.outputs);
    let wiring = Arc::new(wiring);
    let (coordinator, handle) = Coordinator::new(
        Arc::new(NgsiConnector),
        wiring.clone(),
        config.source.clone(),
        CoordinatorSettings::default(),
    );
    let mut coordinator = tokio::spawn(coordinator.run());

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!(
                "{}",
                json!({ "endpoint": event.endpoint.name(), "payload": event.payload })
            );
        }
    });

    tokio::spawn(forward_input(handle.clone(), wiring, config.source));

    handle
        .send(HostEvent::Activate)
        .await
        .context("Coordinator stopped during activation")?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");

            // The coordinator may already be gone; shutdown is then a no-op
            let _ = handle.send(HostEvent::Shutdown).await;
            coordinator.await.context("Coordinator task failed")?;
        }
        result = &mut coordinator => result.context("Coordinator task failed")?,
    }

    tracing::info!("Agent stopped");
    Ok(())
}

/// Read notifications and host commands from stdin and hand them to the coordinator.
async fn forward_input(
    handle: CoordinatorHandle,
    wiring: Arc<ChannelWiring>,
    startup: SourceConfig,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read input");
                break;
            }
        };

        let sent = match InputLine::parse(&line) {
            Ok(InputLine::Notification(notification)) => handle.notify(notification).await,
            Ok(InputLine::Host(command)) => handle.send(command.into_event(&startup, &wiring)).await,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed input line");
                continue;
            }
        };
        if sent.is_err() {
            break;
        }
    }
}
