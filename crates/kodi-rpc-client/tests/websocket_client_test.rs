//! WebSocket client integration tests
//!
//! A fake Kodi listens on a random loopback port. Each test decides how it
//! answers calls (automatically, or by hand through the command channel) and
//! can push notifications or drop the socket at any point.

use futures::{SinkExt, StreamExt};
use kodi_rpc_client::{
    ClientConfig, ConnectionState, KodiClient, KodiClientError, KodiEndpoint, ReconnectConfig,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

enum ServerCommand {
    /// Push a raw text frame
    Send(String),
    /// Drop the socket without a close handshake
    Drop,
}

/// Fake Kodi WebSocket endpoint
struct FakeKodi {
    port: u16,
    current: Arc<parking_lot::Mutex<Option<mpsc::UnboundedSender<ServerCommand>>>>,
    requests: mpsc::UnboundedReceiver<Value>,
    accepted: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FakeKodi {
    async fn start(responder: Responder) -> Self {
        Self::start_with_auth(responder, None).await
    }

    async fn start_with_auth(responder: Responder, required_auth: Option<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let current = Arc::new(parking_lot::Mutex::new(None));
        let accepted = Arc::new(AtomicUsize::new(0));
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let server_current = current.clone();
        let server_accepted = accepted.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { continue };

                        let check_auth = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                            let Some(expected) = required_auth else {
                                return Ok(response);
                            };
                            let authorized = request
                                .headers()
                                .get("authorization")
                                .is_some_and(|value| value == expected);
                            if authorized {
                                Ok(response)
                            } else {
                                let mut rejection = ErrorResponse::new(Some("Unauthorized".to_string()));
                                *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                                Err(rejection)
                            }
                        };

                        let Ok(ws) = accept_hdr_async(stream, check_auth).await else { continue };
                        server_accepted.fetch_add(1, Ordering::SeqCst);

                        let (command_tx, command_rx) = mpsc::unbounded_channel();
                        *server_current.lock() = Some(command_tx);

                        tokio::spawn(serve_connection(ws, command_rx, request_tx.clone(), responder.clone()));
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            port,
            current,
            requests,
            accepted,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    fn endpoint(&self) -> KodiEndpoint {
        // The HTTP port is irrelevant here; only thumbnails would use it
        KodiEndpoint::new("127.0.0.1", 8080).with_ws_port(self.port)
    }

    fn command(&self, command: ServerCommand) {
        let current = self.current.lock();
        current.as_ref().unwrap().send(command).ok().unwrap();
    }

    fn push(&self, payload: Value) {
        self.command(ServerCommand::Send(payload.to_string()));
    }

    fn push_raw(&self, payload: &str) {
        self.command(ServerCommand::Send(payload.to_string()));
    }

    async fn next_request(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("no request reached the server")
            .unwrap()
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for FakeKodi {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut commands: mpsc::UnboundedReceiver<ServerCommand>,
    requests: mpsc::UnboundedSender<Value>,
    responder: Responder,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let request: Value = serde_json::from_str(text.as_str()).unwrap();
                    let _ = requests.send(request.clone());
                    if let Some(reply) = responder(&request)
                        && ws_tx.send(Message::text(reply.to_string())).await.is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = commands.recv() => match command {
                Some(ServerCommand::Send(text)) => {
                    if ws_tx.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Some(ServerCommand::Drop) | None => break,
            },
        }
    }
}

/// Never answers; tests reply by hand
fn silent() -> Responder {
    Arc::new(|_| None)
}

/// Answers every call with its own params
fn echo() -> Responder {
    Arc::new(|request| {
        Some(json!({"jsonrpc": "2.0", "id": request["id"], "result": request["params"]}))
    })
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {}", what);
}

async fn connected_client(server: &FakeKodi, config: ClientConfig) -> KodiClient {
    let client = KodiClient::from_endpoint(server.endpoint(), config).unwrap();
    client.connect().await.unwrap();
    // The server registers its command channel right after the handshake
    eventually("server accepted the connection", || server.accepted() >= 1).await;
    client
}

/// Push a sentinel notification and wait until a listener sees it, so every
/// frame the server sent before it has been processed
async fn flush(server: &FakeKodi, client: &KodiClient) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = client.on("Test.Flush", move |_| {
        let _ = tx.send(());
    });
    server.push(json!({"jsonrpc": "2.0", "method": "Test.Flush", "params": null}));
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("flush notification never arrived");
    client.off(&subscription);
}

#[tokio::test]
async fn test_application_get_properties_scenario() {
    let server = FakeKodi::start(Arc::new(|request| {
        assert_eq!(request["method"], "Application.GetProperties");
        assert_eq!(request["params"], json!({"properties": ["volume"]}));
        Some(json!({"id": request["id"], "result": {"volume": 50}}))
    }))
    .await;
    let client = connected_client(&server, ClientConfig::default()).await;

    assert!(client.can_subscribe());
    let result = client
        .call("Application.GetProperties", json!({"properties": ["volume"]}))
        .await
        .unwrap();

    assert_eq!(result, json!({"volume": 50}));
    assert_eq!(client.connection_status().outstanding_calls, 0);
}

#[tokio::test]
async fn test_ping() {
    let server = FakeKodi::start(Arc::new(|request| {
        Some(json!({"jsonrpc": "2.0", "id": request["id"], "result": "pong"}))
    }))
    .await;
    let client = connected_client(&server, ClientConfig::default()).await;

    assert!(client.ping().await.unwrap());
}

#[tokio::test]
async fn test_responses_in_reverse_order() {
    let mut server = FakeKodi::start(silent()).await;
    let client = connected_client(&server, ClientConfig::default()).await;

    let methods = ["Player.GetActivePlayers", "Player.GetItem", "Playlist.GetItems"];
    let calls: Vec<_> = methods
        .iter()
        .map(|&method| {
            let client = client.clone();
            tokio::spawn(async move { client.call(method, Value::Null).await })
        })
        .collect();

    let mut requests = Vec::new();
    for _ in 0..methods.len() {
        requests.push(server.next_request().await);
    }

    for request in requests.iter().rev() {
        server.push(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": {"answered": request["method"]}
        }));
    }

    for (method, call) in methods.iter().zip(calls) {
        let result = call.await.unwrap().unwrap();
        assert_eq!(result["answered"], *method);
    }
}

#[tokio::test]
async fn test_concurrent_calls_do_not_cross_talk() {
    let server = FakeKodi::start(echo()).await;
    let client = connected_client(&server, ClientConfig::default()).await;

    let calls: Vec<_> = (0..50)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move { (n, client.call("Test.Echo", json!({"n": n})).await) })
        })
        .collect();

    for call in calls {
        let (n, result) = call.await.unwrap();
        assert_eq!(result.unwrap(), json!({"n": n}));
    }
    assert_eq!(client.statistics().calls_started, 50);
}

#[tokio::test]
async fn test_remote_error_reaches_caller() {
    let server = FakeKodi::start(Arc::new(|request| {
        Some(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": -32601, "message": "Method not found."}
        }))
    }))
    .await;
    let client = connected_client(&server, ClientConfig::default()).await;

    let result = client.call("Nope.Nothing", Value::Null).await;
    match result {
        Err(KodiClientError::Remote { code, message, data }) => {
            assert_eq!(code, -32601);
            assert_eq!(message, "Method not found.");
            assert!(data.is_none());
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unmatched_response_is_ignored() {
    let server = FakeKodi::start(echo()).await;
    let client = connected_client(&server, ClientConfig::default()).await;

    server.push(json!({"jsonrpc": "2.0", "id": 999, "result": "stray"}));
    flush(&server, &client).await;

    assert_eq!(client.statistics().unmatched_responses, 1);
    assert!(client.is_connected());
    assert_eq!(client.call("Test.Echo", json!([1])).await.unwrap(), json!([1]));
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let server = FakeKodi::start(echo()).await;
    let client = connected_client(&server, ClientConfig::default()).await;

    server.push_raw("definitely not json");
    server.push_raw("[1, 2, 3]");
    server.push(json!({"jsonrpc": "1.0", "id": 1, "result": true}));
    server.push(json!({"jsonrpc": "2.0", "id": 1, "result": true, "error": {"code": 1, "message": "x"}}));
    flush(&server, &client).await;

    let stats = client.statistics();
    assert_eq!(stats.malformed_messages, 4);
    assert!(client.is_connected());
    assert_eq!(client.call("Test.Echo", json!("ok")).await.unwrap(), json!("ok"));
}

#[tokio::test]
async fn test_disconnect_fails_every_outstanding_call() {
    let mut server = FakeKodi::start(silent()).await;
    let client = connected_client(&server, ClientConfig::default()).await;

    let calls: Vec<_> = (0..3)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.call("Player.GetItem", Value::Null).await })
        })
        .collect();
    for _ in 0..3 {
        server.next_request().await;
    }

    server.command(ServerCommand::Drop);

    for call in calls {
        let result = call.await.unwrap();
        assert!(
            matches!(result, Err(KodiClientError::ConnectionLost(_))),
            "unexpected result {:?}",
            result
        );
    }

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.connection_status().outstanding_calls, 0);
    assert!(matches!(
        client.call("JSONRPC.Ping", Value::Null).await,
        Err(KodiClientError::NotConnected)
    ));
}

#[tokio::test]
async fn test_timeout_then_late_response() {
    let mut server = FakeKodi::start(silent()).await;
    let client = connected_client(&server, ClientConfig::default()).await;

    let result = client
        .call_with_timeout("VideoLibrary.Scan", Value::Null, Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(KodiClientError::Timeout { ref method, .. }) if method == "VideoLibrary.Scan"));

    let request = server.next_request().await;
    server.push(json!({"jsonrpc": "2.0", "id": request["id"], "result": "OK"}));
    flush(&server, &client).await;

    let stats = client.statistics();
    assert_eq!(stats.unmatched_responses, 1);
    assert_eq!(stats.outstanding_calls, 0);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_notifications_fan_out_by_method() {
    let server = FakeKodi::start(silent()).await;
    let client = connected_client(&server, ClientConfig::default()).await;

    let (play_tx, mut play_rx) = mpsc::unbounded_channel();
    for listener in 0..2 {
        let tx = play_tx.clone();
        client.on("Player.OnPlay", move |params| {
            let _ = tx.send((listener, params));
        });
    }
    let pause_hits = Arc::new(AtomicUsize::new(0));
    let hits = pause_hits.clone();
    client.on("Player.OnPause", move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
    });

    // Nobody listens to this one
    server.push(json!({"jsonrpc": "2.0", "method": "System.OnWake", "params": {"data": null, "sender": "xbmc"}}));
    server.push(json!({
        "jsonrpc": "2.0",
        "method": "Player.OnPlay",
        "params": {"data": {"item": {"id": 12, "type": "episode"}, "player": {"playerid": 1}}, "sender": "xbmc"}
    }));
    flush(&server, &client).await;

    let mut listeners = Vec::new();
    for _ in 0..2 {
        let (listener, params) = play_rx.recv().await.unwrap();
        assert_eq!(params["data"]["item"]["id"], 12);
        listeners.push(listener);
    }
    listeners.sort();
    assert_eq!(listeners, vec![0, 1]);
    assert!(play_rx.try_recv().is_err());
    assert_eq!(pause_hits.load(Ordering::SeqCst), 0);
    assert_eq!(client.statistics().notifications_received, 3);
}

#[tokio::test]
async fn test_panicking_listener_does_not_stop_delivery() {
    let server = FakeKodi::start(echo()).await;
    let client = connected_client(&server, ClientConfig::default()).await;

    let hits = Arc::new(AtomicUsize::new(0));
    client.on("Player.OnStop", |_| panic!("listener bug"));
    let counter = hits.clone();
    client.on("Player.OnStop", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for _ in 0..2 {
        server.push(json!({"jsonrpc": "2.0", "method": "Player.OnStop", "params": {"data": {"end": true}, "sender": "xbmc"}}));
    }
    flush(&server, &client).await;

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(client.call("Test.Echo", json!(1)).await.unwrap(), json!(1));
}

#[tokio::test]
async fn test_close_fails_outstanding_calls() {
    let mut server = FakeKodi::start(silent()).await;
    let client = connected_client(&server, ClientConfig::default()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("Player.GetItem", Value::Null).await }
    });
    server.next_request().await;

    client.close().await;
    client.close().await;

    assert!(matches!(call.await.unwrap(), Err(KodiClientError::ConnectionClosed)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_keeps_listeners_and_ids() {
    let mut server = FakeKodi::start(echo()).await;
    let config = ClientConfig {
        reconnect: ReconnectConfig {
            enabled: true,
            initial_delay: Duration::from_millis(20),
            jitter: 0.0,
            ..ReconnectConfig::default()
        },
        ..ClientConfig::default()
    };
    let client = connected_client(&server, config).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on("Application.OnVolumeChanged", move |params| {
        let _ = tx.send(params);
    });

    client.call("Test.Echo", json!("before")).await.unwrap();
    let first_id = server.next_request().await["id"].as_u64().unwrap();

    server.command(ServerCommand::Drop);
    eventually("second connection accepted", || server.accepted() == 2).await;
    eventually("client reconnected", || client.is_connected()).await;

    client.call("Test.Echo", json!("after")).await.unwrap();
    let second_id = server.next_request().await["id"].as_u64().unwrap();
    assert!(second_id > first_id);

    server.push(json!({
        "jsonrpc": "2.0",
        "method": "Application.OnVolumeChanged",
        "params": {"data": {"muted": false, "volume": 75}, "sender": "xbmc"}
    }));
    let params = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(params["data"]["volume"], 75);

    let stats = client.statistics();
    assert_eq!(stats.disconnects, 1);
    assert_eq!(stats.reconnects, 1);
}

#[tokio::test]
async fn test_handshake_auth() {
    let server = FakeKodi::start_with_auth(echo(), Some("Basic a29kaTprb2Rp")).await;

    let anonymous = KodiClient::from_endpoint(server.endpoint(), ClientConfig::default()).unwrap();
    assert!(matches!(anonymous.connect().await, Err(KodiClientError::InvalidAuth)));
    assert_eq!(anonymous.state(), ConnectionState::Disconnected);

    let endpoint = server.endpoint().with_credentials("kodi", "kodi");
    let client = KodiClient::from_endpoint(endpoint, ClientConfig::default()).unwrap();
    client.connect().await.unwrap();
    assert_eq!(client.call("Test.Echo", json!("hi")).await.unwrap(), json!("hi"));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let endpoint = KodiEndpoint::new("127.0.0.1", 8080).with_ws_port(port);
    let client = KodiClient::from_endpoint(endpoint, ClientConfig::default()).unwrap();

    assert!(matches!(client.connect().await, Err(KodiClientError::Connection(_))));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
