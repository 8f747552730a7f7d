//! Authenticated WebSocket server and subscription-filtered broadcaster
//! (spec §4.G, §4.H).
//!
//! [`broadcast`] holds the subject-matched fanout registry; this module
//! wires it to an axum upgrade handler: bearer auth at handshake time, a
//! reader task that applies `subscribe`/`unsubscribe`/`pong` frames, and a
//! writer task that drains the client's channel and drives the keepalive
//! ping timer. No lock is ever held across a socket write — the reader and
//! writer tasks only ever touch the [`Broadcaster`]'s registry through its
//! own short-lived `Mutex` lock.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod protocol;

pub use broadcast::{Broadcaster, RemoteUpdate, SessionUpdate};
pub use protocol::{ClientFrame, ScopeRequest, ServerFrame};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use devpulse_config::WsConfig;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use ulid::Ulid;

/// Close code for a bearer-token mismatch at upgrade time (spec §4.G).
const CLOSE_CODE_UNAUTHORIZED: u16 = 4401;

/// Shared state the `/ws` route needs, handed in as axum `State`.
#[derive(Clone)]
pub struct WsState {
    broadcaster: Broadcaster,
    api_key: Arc<str>,
    config: WsConfig,
}

impl WsState {
    /// Build the state the upgrade handler closes over.
    pub fn new(broadcaster: Broadcaster, api_key: impl Into<Arc<str>>, config: WsConfig) -> Self {
        Self {
            broadcaster,
            api_key: api_key.into(),
            config,
        }
    }

    /// The broadcaster backing this state, for callers that need to fan
    /// events out from outside the WS route (the ingest and pipeline paths).
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }
}

/// `GET /ws` handler. Always completes the HTTP upgrade — a bearer-token
/// mismatch is reported as a WS close frame with code 4401 rather than an
/// HTTP status, since the `WebSocket` constructor in a browser cannot
/// observe the latter.
pub async fn ws_upgrade(
    State(state): State<WsState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let presented = bearer_token(&headers).or_else(|| params.get("token").cloned());
    let authorized = presented.as_deref() == Some(&*state.api_key);
    ws.on_upgrade(move |socket| handle_socket(socket, state, authorized))
}

/// Pull a bearer token out of `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ").map(str::to_string)
}

async fn handle_socket(socket: WebSocket, state: WsState, authorized: bool) {
    if !authorized {
        let mut socket = socket;
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_CODE_UNAUTHORIZED,
                reason: "invalid bearer token".into(),
            })))
            .await;
        return;
    }

    let client_id = Ulid::new().to_string();
    let mut rx = state.broadcaster.register(client_id.clone());
    let (mut sender, mut receiver) = socket.split();

    let is_alive = Arc::new(AtomicBool::new(true));
    let (reader_done_tx, mut reader_done_rx) = oneshot::channel::<()>();

    let broadcaster_for_reader = state.broadcaster.clone();
    let client_id_for_reader = client_id.clone();
    let is_alive_for_reader = Arc::clone(&is_alive);
    let reader = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            let message = match message {
                Ok(m) => m,
                Err(_) => break,
            };
            match message {
                Message::Text(text) => {
                    is_alive_for_reader.store(true, Ordering::Relaxed);
                    handle_client_frame(&broadcaster_for_reader, &client_id_for_reader, &text);
                }
                Message::Pong(_) => {
                    is_alive_for_reader.store(true, Ordering::Relaxed);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        let _ = reader_done_tx.send(());
    });

    let ping_interval = Duration::from_millis(state.config.ping_interval_ms);
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await; // the first tick fires immediately; skip it

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if !is_alive.swap(false, Ordering::Relaxed) {
                    tracing::debug!(client_id = %client_id, "ws keepalive timeout, closing");
                    break;
                }
                let Ok(text) = serde_json::to_string(&ServerFrame::Ping) else { continue };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = &mut reader_done_rx => {
                break;
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    reader.abort();
    state.broadcaster.remove(&client_id);
}

/// Parse and apply one client→server frame, acking or erroring directly
/// back to the sender via [`Broadcaster::send_to`].
fn handle_client_frame(broadcaster: &Broadcaster, client_id: &str, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            broadcaster.send_to(
                client_id,
                ServerFrame::Error {
                    message: format!("malformed frame: {e}"),
                },
            );
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe(scope) => {
            let key = scope.key();
            broadcaster.subscribe(client_id, &key);
            broadcaster.send_to(client_id, ServerFrame::Subscribed { scope: key });
        }
        ClientFrame::Unsubscribe(scope) => {
            let key = scope.key();
            broadcaster.unsubscribe(client_id, &key);
            broadcaster.send_to(client_id, ServerFrame::Unsubscribed { scope: key });
        }
        ClientFrame::Pong => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc123".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn handle_client_frame_acks_subscribe() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.register("C1".to_string());
        handle_client_frame(&broadcaster, "C1", r#"{"type":"subscribe","scope":"all"}"#);
        let frame = rx.try_recv().unwrap();
        assert!(matches!(frame, ServerFrame::Subscribed { scope } if scope == "all"));
    }

    #[test]
    fn handle_client_frame_errors_on_garbage() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.register("C1".to_string());
        handle_client_frame(&broadcaster, "C1", "not json");
        let frame = rx.try_recv().unwrap();
        assert!(matches!(frame, ServerFrame::Error { .. }));
    }
}
