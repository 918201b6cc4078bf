//! WebSocket transport tests against a local tungstenite server
//!
//! Run with: `cargo test -p client --test websocket_tests`

use client::{
    Authorization, ConnectionManager, ConnectionState, HidError, MemoryAuthorizationStore,
    WebSocketConnector,
};
use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_mock_announcement, listing_frames, with_timeout};
use futures::{SinkExt, StreamExt};
use protocol::{DeviceAnnouncement, Frame, LogicalId, PhysicalId, encode_input_report};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

const ORIGIN: &str = "https://app.example";

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text),
        Frame::Binary(data) => Message::binary(data),
    }
}

/// Accept one client, report its handshake, answer `list` and `open7`
async fn serve_once(
    listener: TcpListener,
    devices: Vec<DeviceAnnouncement>,
    handshake: oneshot::Sender<(String, Option<String>)>,
) {
    let (stream, _) = listener.accept().await.unwrap();

    let mut seen = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let origin = request
            .headers()
            .get("origin")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        seen = Some((request.uri().path().to_string(), origin));
        Ok(response)
    };
    let mut socket = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .unwrap();
    if let Some(seen) = seen {
        let _ = handshake.send(seen);
    }

    while let Some(Ok(message)) = socket.next().await {
        match message {
            Message::Text(text) if text.as_str() == "list" => {
                for frame in listing_frames(&devices) {
                    socket.send(to_message(frame)).await.unwrap();
                }
            }
            Message::Text(text) if text.as_str() == "open7" => {
                let report = encode_input_report(LogicalId(7), Some(1), &[0x10, 0x20]);
                socket.send(to_message(report)).await.unwrap();
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

fn manager(url: String) -> ConnectionManager {
    let connector = WebSocketConnector::new(url)
        .with_origin(ORIGIN)
        .with_connect_timeout(Some(DEFAULT_TEST_TIMEOUT));
    let authorization = Authorization::load(Box::new(MemoryAuthorizationStore::with_granted([
        PhysicalId(100),
    ])))
    .unwrap();
    ConnectionManager::new(
        Arc::new(connector),
        Arc::new(authorization),
        Some(DEFAULT_TEST_TIMEOUT),
    )
}

#[tokio::test]
async fn test_websocket_listing_and_input_reports() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handshake_tx, handshake_rx) = oneshot::channel();
    tokio::spawn(serve_once(
        listener,
        vec![create_mock_announcement(7, 100, 0x046D, 0xC52B)],
        handshake_tx,
    ));

    let manager = manager(format!("ws://{}/", addr));
    let devices = with_timeout(DEFAULT_TEST_TIMEOUT, manager.refresh_device_list())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].product_name(), "Test Product 7");

    let (path, origin) = handshake_rx.await.unwrap();
    assert_eq!(path, "/r1");
    assert_eq!(origin.as_deref(), Some(ORIGIN));

    let (tx, mut reports) = mpsc::unbounded_channel();
    devices[0].add_input_report_observer(move |event| {
        let _ = tx.send(event.clone());
    });
    devices[0].open().await.unwrap();

    let event = with_timeout(DEFAULT_TEST_TIMEOUT, reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.report_id, Some(1));
    assert_eq!(&event.data[..], &[0x10, 0x20]);

    manager.disconnect();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!devices[0].is_open());
}

#[tokio::test]
async fn test_websocket_refused_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let manager = manager(format!("ws://{}/", addr));
    let result = manager.ensure_connected().await;
    assert!(matches!(result, Err(HidError::ProviderUnreachable(_))));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_websocket_invalid_endpoint() {
    let manager = manager("not a url".to_string());
    let result = manager.ensure_connected().await;
    assert!(matches!(result, Err(HidError::ProviderUnreachable(_))));
}
