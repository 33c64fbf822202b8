//! Integration tests for the streaming session
//!
//! These run against a loopback WebSocket server standing in for the
//! recognition server: it accepts binary PCM frames and pushes UTF-8
//! transcript messages, including the `"Done!"` control sentinel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use sherpa_scribe::config::{AppSettings, StreamConfig};
use sherpa_scribe::streaming::{SessionEvent, SessionTransport};
use sherpa_scribe::{RecognizerController, RecognizerState, SessionState};

async fn bind_server() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn stream_config(port: u16) -> StreamConfig {
    StreamConfig {
        server_addr: "127.0.0.1".to_string(),
        server_port: port,
        connect_timeout: Duration::from_secs(2),
    }
}

fn test_settings(port: u16) -> AppSettings {
    AppSettings {
        server_addr: "127.0.0.1".to_string(),
        server_port: port,
        connect_timeout_ms: 2_000,
        // Keep the rescan tick out of these tests
        device_poll_secs: 3_600,
        ..AppSettings::default()
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<RecognizerState>,
    predicate: impl Fn(&RecognizerState) -> bool,
) -> RecognizerState {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        {
            let state = rx.borrow().clone();
            if predicate(&state) {
                return state;
            }
        }
        tokio::time::timeout_at(deadline, rx.changed())
            .await
            .expect("state change before deadline")
            .expect("state channel open");
    }
}

// ============================================================================
// Transport level
// ============================================================================

#[tokio::test]
async fn frames_go_out_as_3200_byte_messages_and_sentinel_is_filtered() {
    let (listener, port) = bind_server().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Binary(payload) = msg {
                // One frame: 800 little-endian f32 samples
                assert_eq!(payload.len(), 3200);
                ws.send(Message::Text("hello world".to_string())).await.unwrap();
                ws.send(Message::Text("Done!".to_string())).await.unwrap();
                ws.send(Message::Text("hello world again".to_string()))
                    .await
                    .unwrap();
                break;
            }
        }
        let _ = ws.close(None).await;
    });

    let (events_tx, mut events) = mpsc::channel(16);
    let generation = Uuid::new_v4();
    SessionTransport::establish(stream_config(port), generation, events_tx).await;

    let mut transport = match events.recv().await {
        Some(SessionEvent::Established { transport, .. }) => transport,
        other => panic!("expected Established, got {:?}", other.map(|e| e.kind())),
    };

    transport.send_frame(&[0.0f32; 800]).await.unwrap();

    // The sentinel between the two transcripts must never surface
    match events.recv().await {
        Some(SessionEvent::Transcript { text, .. }) => assert_eq!(text, "hello world"),
        other => panic!("expected Transcript, got {:?}", other.map(|e| e.kind())),
    }
    match events.recv().await {
        Some(SessionEvent::Transcript { text, .. }) => assert_eq!(text, "hello world again"),
        other => panic!("expected Transcript, got {:?}", other.map(|e| e.kind())),
    }
    match events.recv().await {
        Some(SessionEvent::Closed { .. }) => {}
        other => panic!("expected Closed, got {:?}", other.map(|e| e.kind())),
    }

    transport.close().await;
}

// ============================================================================
// Controller level
// ============================================================================

#[tokio::test]
async fn transcripts_overwrite_and_close_returns_to_disconnected() {
    let (listener, port) = bind_server().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        for text in ["first", "Done!", "second"] {
            ws.send(Message::Text(text.to_string())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        let _ = ws.close(None).await;
    });

    let controller = RecognizerController::new(&test_settings(port));
    let mut rx = controller.watch_state();

    controller.connect().await;
    let state = wait_for(&mut rx, |s| s.session == SessionState::Open).await;
    assert!(state.error.is_none());

    // Overwrite, not append; sentinel never displayed
    wait_for(&mut rx, |s| s.last_result == "first").await;
    let state = wait_for(&mut rx, |s| s.last_result == "second").await;
    assert_eq!(state.last_result, "second");

    // Server close tears the session down without an error
    let state = wait_for(&mut rx, |s| s.session == SessionState::Disconnected).await;
    assert!(state.error.is_none());
    assert!(!state.is_recognizing);

    controller.shutdown().await;
}

#[tokio::test]
async fn disconnect_is_idempotent_and_reconnect_works() {
    let (listener, port) = bind_server().await;

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                // Sit on the connection, discarding frames, until the peer leaves
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let controller = RecognizerController::new(&test_settings(port));
    let mut rx = controller.watch_state();

    controller.connect().await;
    wait_for(&mut rx, |s| s.session == SessionState::Open).await;

    controller.disconnect().await;
    controller.disconnect().await;
    let state = controller.snapshot();
    assert_eq!(state.session, SessionState::Disconnected);
    assert!(state.error.is_none());

    // A fresh connect starts a new session instance
    controller.connect().await;
    wait_for(&mut rx, |s| s.session == SessionState::Open).await;

    controller.shutdown().await;
}

#[tokio::test]
async fn connect_while_open_is_a_noop() {
    let (listener, port) = bind_server().await;
    let (count_tx, mut count_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let _ = count_tx.send(());
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let controller = RecognizerController::new(&test_settings(port));
    let mut rx = controller.watch_state();

    controller.connect().await;
    wait_for(&mut rx, |s| s.session == SessionState::Open).await;
    assert!(count_rx.recv().await.is_some());

    controller.connect().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(controller.snapshot().session, SessionState::Open);
    // No second connection was opened
    assert!(count_rx.try_recv().is_err());

    controller.shutdown().await;
}
