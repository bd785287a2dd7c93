#![cfg(feature = "websocket")]

use beacon_transport::{Host, HostConfig, HostEvent, PeerSender, WebSocketHost, DEFAULT_CHANNEL};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

async fn bind_local(max_peers: usize) -> WebSocketHost {
    WebSocketHost::bind(HostConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        max_peers,
        ..Default::default()
    })
    .await
    .unwrap()
}

async fn next_event(host: &mut WebSocketHost) -> HostEvent {
    for _ in 0..50 {
        if let Some(event) = host.service(Duration::from_millis(100)).await.unwrap() {
            return event;
        }
    }
    panic!("no event within 5s");
}

#[tokio::test]
async fn test_websocket_peer_lifecycle() {
    let mut host = bind_local(4).await;
    let url = format!("ws://{}", host.local_addr());

    let (mut client, _) = connect_async(url).await.unwrap();

    let peer = match next_event(&mut host).await {
        HostEvent::Connect { peer, addr } => {
            assert!(addr.is_some());
            peer
        }
        other => panic!("Expected Connect, got {:?}", other),
    };
    assert_eq!(host.peer_count(), 1);

    client
        .send(Message::Text("SUB:news:".to_string()))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut host).await,
        HostEvent::Receive {
            peer,
            channel: DEFAULT_CHANNEL,
            packet: Bytes::from_static(b"SUB:news:"),
        }
    );

    host.send(peer, DEFAULT_CHANNEL, Bytes::from_static(b"PUB:news:hello"))
        .unwrap();
    match client.next().await {
        Some(Ok(Message::Binary(data))) => assert_eq!(data, b"PUB:news:hello"),
        other => panic!("Expected binary message, got {:?}", other),
    }

    client.close(None).await.unwrap();
    assert_eq!(next_event(&mut host).await, HostEvent::Disconnect { peer });
    assert_eq!(host.peer_count(), 0);
}

#[tokio::test]
async fn test_websocket_oversized_message_is_dropped() {
    let mut host = WebSocketHost::bind(HostConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        max_message_size: 16,
        ..Default::default()
    })
    .await
    .unwrap();
    let url = format!("ws://{}", host.local_addr());

    let (mut client, _) = connect_async(url).await.unwrap();
    let peer = next_event(&mut host).await.peer();

    client
        .send(Message::Binary(vec![b'x'; 64]))
        .await
        .unwrap();
    client
        .send(Message::Binary(b"SUB:a:".to_vec()))
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut host).await,
        HostEvent::Receive {
            peer,
            channel: DEFAULT_CHANNEL,
            packet: Bytes::from_static(b"SUB:a:"),
        }
    );
}

#[tokio::test]
async fn test_websocket_peer_limit() {
    let mut host = bind_local(1).await;
    let url = format!("ws://{}", host.local_addr());

    let (_first, _) = connect_async(url.clone()).await.unwrap();
    assert!(matches!(
        next_event(&mut host).await,
        HostEvent::Connect { .. }
    ));

    assert!(connect_async(url).await.is_err());
    assert_eq!(host.peer_count(), 1);
}

#[tokio::test]
async fn test_dropping_host_closes_connections() {
    let mut host = bind_local(4).await;
    let url = format!("ws://{}", host.local_addr());

    let (mut client, _) = connect_async(url).await.unwrap();
    assert!(matches!(
        next_event(&mut host).await,
        HostEvent::Connect { .. }
    ));

    drop(host);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection stayed open after host drop");
}
