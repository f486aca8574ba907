//! Mock ARI server for integration testing.
//!
//! Serves a small but realistic API description (root index plus two group
//! documents), a handful of REST endpoints backing those operations, and a
//! `/ari/events` WebSocket that tests can push frames into or kick closed.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// One request the server observed: (method, path-and-query, body)
pub type RecordedRequest = (String, String, String);

#[derive(Clone)]
pub struct MockState {
    events_tx: broadcast::Sender<String>,
    kick_tx: broadcast::Sender<()>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    fail_bridges_doc: Arc<AtomicBool>,
    ws_connections: Arc<AtomicUsize>,
}

pub struct MockAriServer {
    pub addr: SocketAddr,
    state: MockState,
    server_task: tokio::task::JoinHandle<()>,
}

impl MockAriServer {
    pub async fn start() -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let (kick_tx, _) = broadcast::channel(8);
        let state = MockState {
            events_tx,
            kick_tx,
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_bridges_doc: Arc::new(AtomicBool::new(false)),
            ws_connections: Arc::new(AtomicUsize::new(0)),
        };

        let router = Router::new()
            .route("/ari/api-docs/resources.json", get(resources_index))
            .route("/ari/api-docs/{file}", get(group_doc))
            .route("/ari/channels", get(list_channels).post(originate))
            .route("/ari/channels/{channelId}", get(get_channel))
            .route("/ari/channels/{channelId}", delete(hangup))
            .route("/ari/channels/{channelId}/play", post(play))
            .route("/ari/bridges", get(list_bridges).post(create_bridge))
            .route("/ari/events", get(events_ws))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            state,
            server_task,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/ari", self.addr)
    }

    /// Push one raw frame to every connected event socket.
    pub fn send_event(&self, frame: serde_json::Value) {
        let _ = self.state.events_tx.send(frame.to_string());
    }

    pub fn send_raw_event(&self, text: &str) {
        let _ = self.state.events_tx.send(text.to_string());
    }

    /// Drop every connected event socket, simulating an unexpected close.
    pub fn kick_event_sockets(&self) {
        let _ = self.state.kick_tx.send(());
    }

    /// Stop accepting connections; the port starts refusing connects.
    pub fn shutdown(&self) {
        self.server_task.abort();
        self.kick_event_sockets();
    }

    /// Make the bridges group document answer 500 from now on.
    pub fn fail_bridges_doc(&self) {
        self.state.fail_bridges_doc.store(true, Ordering::SeqCst);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    /// Requests observed so far, excluding API description fetches.
    pub fn recorded_requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Wait until at least `count` event sockets have connected.
    pub async fn wait_for_ws_connections(&self, count: usize) {
        for _ in 0..200 {
            if self.ws_connection_count() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("event socket never connected");
    }
}

fn record(state: &MockState, method: &str, uri: &Uri, body: &str) {
    state.requests.lock().unwrap().push((
        method.to_string(),
        uri.path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        body.to_string(),
    ));
}

// ── API description ─────────────────────────────────────────────────

async fn resources_index() -> Json<serde_json::Value> {
    Json(json!({
        "apis": [
            {"path": "/api-docs/channels.{format}"},
            {"path": "/api-docs/bridges.{format}"}
        ]
    }))
}

async fn group_doc(State(state): State<MockState>, Path(file): Path<String>) -> impl IntoResponse {
    match file.as_str() {
        "channels.json" => (StatusCode::OK, Json(channels_doc())).into_response(),
        "bridges.json" => {
            if state.fail_bridges_doc.load(Ordering::SeqCst) {
                (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
            } else {
                (StatusCode::OK, Json(bridges_doc())).into_response()
            }
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn channels_doc() -> serde_json::Value {
    // basePath deliberately advertises an unreachable host: the client must
    // splice in the host it actually used to fetch the description.
    json!({
        "resourcePath": "/api-docs/channels.{format}",
        "basePath": "http://unreachable-internal:8088/ari",
        "apis": [
            {"path": "/channels", "operations": [
                {"nickname": "list", "httpMethod": "GET", "responseClass": "List[Channel]"},
                {"nickname": "originate", "httpMethod": "POST", "parameters": [
                    {"name": "endpoint", "paramType": "query", "required": true, "type": "string"},
                    {"name": "app", "paramType": "query", "required": false, "type": "string"},
                    {"name": "formats", "paramType": "query", "required": false, "type": "string"},
                    {"name": "variables", "paramType": "body", "required": false, "type": "containers"}
                ], "responseClass": "Channel"}
            ]},
            {"path": "/channels/{channelId}", "operations": [
                {"nickname": "get", "httpMethod": "GET", "parameters": [
                    {"name": "channelId", "paramType": "path", "required": true, "type": "string"}
                ], "responseClass": "Channel"},
                {"nickname": "hangup", "method": "DELETE", "parameters": [
                    {"name": "channelId", "paramType": "path", "required": true, "dataType": "string"}
                ]}
            ]},
            {"path": "/channels/{channelId}/play", "operations": [
                {"nickname": "play", "httpMethod": "POST", "parameters": [
                    {"name": "channelId", "paramType": "path", "required": true, "type": "string"},
                    {"name": "media", "paramType": "query", "required": true, "type": "string"}
                ], "responseClass": "Playback"}
            ]}
        ],
        "models": {
            "Channel": {
                "id": "Channel",
                "properties": {
                    "id": {"type": "string", "required": true},
                    "state": {"type": "string"}
                }
            }
        }
    })
}

fn bridges_doc() -> serde_json::Value {
    json!({
        "resourcePath": "/api-docs/bridges.{format}",
        "basePath": "http://unreachable-internal:8088/ari",
        "apis": [
            {"path": "/bridges", "operations": [
                {"nickname": "list", "httpMethod": "GET", "responseClass": "List[Bridge]"},
                {"nickname": "create", "httpMethod": "POST", "parameters": [
                    {"name": "type", "paramType": "query", "required": false, "type": "string"}
                ], "responseClass": "Bridge"}
            ]}
        ],
        "models": {}
    })
}

// ── REST endpoints ──────────────────────────────────────────────────

async fn list_channels(State(state): State<MockState>, uri: Uri) -> Json<serde_json::Value> {
    record(&state, "GET", &uri, "");
    Json(json!([
        {"id": "c-1", "state": "Up"},
        {"id": "c-2", "state": "Ring"}
    ]))
}

async fn originate(State(state): State<MockState>, uri: Uri, body: String) -> Json<serde_json::Value> {
    record(&state, "POST", &uri, &body);
    Json(json!({"id": "c-new", "state": "Down"}))
}

async fn get_channel(
    State(state): State<MockState>,
    Path(channel_id): Path<String>,
    uri: Uri,
) -> impl IntoResponse {
    record(&state, "GET", &uri, "");
    if channel_id == "missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "Channel not found"})),
        )
            .into_response();
    }
    Json(json!({"id": channel_id, "state": "Up"})).into_response()
}

async fn hangup(State(state): State<MockState>, uri: Uri) -> impl IntoResponse {
    record(&state, "DELETE", &uri, "");
    StatusCode::NO_CONTENT
}

async fn play(
    State(state): State<MockState>,
    Path(channel_id): Path<String>,
    uri: Uri,
) -> Json<serde_json::Value> {
    record(&state, "POST", &uri, "");
    Json(json!({
        "id": "pb-1",
        "state": "queued",
        "target_uri": format!("channel:{}", channel_id)
    }))
}

async fn list_bridges(State(state): State<MockState>, uri: Uri) -> Json<serde_json::Value> {
    record(&state, "GET", &uri, "");
    Json(json!([]))
}

async fn create_bridge(State(state): State<MockState>, uri: Uri) -> Json<serde_json::Value> {
    record(&state, "POST", &uri, "");
    Json(json!({"id": "b-1", "technology": "simple_bridge"}))
}

// ── Event stream ────────────────────────────────────────────────────

async fn events_ws(ws: WebSocketUpgrade, State(state): State<MockState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_event_socket(socket, state))
}

async fn handle_event_socket(mut socket: WebSocket, state: MockState) {
    let mut events_rx = state.events_tx.subscribe();
    let mut kick_rx = state.kick_tx.subscribe();
    state.ws_connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            frame = events_rx.recv() => {
                match frame {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            _ = kick_rx.recv() => {
                // Drop without a close frame: an unexpected disconnect
                break;
            }
            incoming = socket.recv() => {
                match incoming {
                    // axum answers pings with pongs on its own; everything
                    // else from the client is ignored
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    }
}
