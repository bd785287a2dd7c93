//! Broker startup and shutdown.

use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use beacon_core::{Dispatcher, TopicRegistry};
use beacon_transport::WebSocketHost;
use std::sync::Arc;
use tracing::{error, info};

/// Bind the transport and assemble the dispatch loop.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the transport
/// cannot be initialized.
pub async fn bind(config: &Config) -> Result<Dispatcher<WebSocketHost>> {
    config.validate()?;
    let host_config = config.host_config()?;
    let addr = host_config.bind_addr;
    let host = WebSocketHost::bind(host_config)
        .await
        .with_context(|| format!("Failed to initialize transport on {}", addr))?;

    let registry = Arc::new(TopicRegistry::with_config(config.registry.clone()));
    Ok(Dispatcher::with_config(
        host,
        registry,
        config.dispatch.clone(),
    ))
}

/// Run the broker until ctrl-c.
///
/// # Errors
///
/// Returns an error if initialization fails or the transport fails while
/// running.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => metrics::init_metrics(),
            Err(e) => error!("Failed to start metrics server: {}", e),
        }
    }

    let mut dispatcher = bind(&config).await?;
    info!(
        "Beacon broker listening on ws://{}",
        dispatcher.host().local_addr()
    );

    let stop = dispatcher.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                stop.stop();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    dispatcher.run().await?;

    let stats = dispatcher.registry().stats();
    info!(
        topics = stats.topic_count,
        subscriptions = stats.total_subscriptions,
        peers = dispatcher.connections().peer_count(),
        "Beacon broker stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::{codec, Command};
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    fn local_config() -> Config {
        let mut config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Config::default()
        };
        config.dispatch.poll_timeout_ms = 10;
        config
    }

    async fn send(client: &mut Client, command: Command) {
        let packet = codec::encode(&command);
        client
            .send(Message::Binary(packet.to_vec()))
            .await
            .unwrap();
    }

    async fn next_command(client: &mut Client) -> Command {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match message {
            Message::Binary(data) => codec::decode_slice(&data).unwrap(),
            other => panic!("Expected binary message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broker_end_to_end() {
        let mut dispatcher = bind(&local_config()).await.unwrap();
        let url = format!("ws://{}", dispatcher.host().local_addr());
        let stop = dispatcher.stop_handle();
        let broker = tokio::spawn(async move { dispatcher.run().await });

        let (mut subscriber, _) = connect_async(url.clone()).await.unwrap();
        let (mut publisher, _) = connect_async(url).await.unwrap();

        // The subscriber's own messages are ordered, so once it sees its
        // own publish the subscription is in place.
        send(&mut subscriber, Command::subscribe("news")).await;
        send(&mut subscriber, Command::publish("news", &b"ready"[..])).await;
        assert_eq!(
            next_command(&mut subscriber).await,
            Command::publish("news", &b"ready"[..])
        );

        send(&mut publisher, Command::publish("news", &b"12:34:56"[..])).await;
        assert_eq!(
            next_command(&mut subscriber).await,
            Command::publish("news", &b"12:34:56"[..])
        );

        stop.stop();
        broker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let first = bind(&local_config()).await.unwrap();
        let taken = first.host().local_addr();

        let config = Config {
            host: taken.ip().to_string(),
            port: taken.port(),
            ..local_config()
        };
        assert!(bind(&config).await.is_err());
    }
}
