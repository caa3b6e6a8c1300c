//! End-to-end session tests against an in-process mock gateway.
//!
//! The gateway is a small axum app exposing the same HTTP and WebSocket
//! surface as the real one; each test scripts the frames it pushes over
//! the socket and records what the client sends back.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::routing::{any, post};
use axum::{Json, Router};
use confab_media::{
    CaptureSettings, CaptureSource, FrameCallback, MediaConnection, MediaConnector, MediaError,
    MediaKind, MediaSink,
};
use confab_session::{AgentProfile, ApiClient, ChannelState, Session, SessionEvent};
use confab_transcript::Role;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

#[derive(Clone)]
struct Gateway {
    /// Text messages received on the message endpoint.
    texts: Arc<Mutex<Vec<String>>>,
    /// Avatar endpoint hits, in order.
    avatar_calls: Arc<Mutex<Vec<String>>>,
    /// Frames pushed to the client right after the socket opens.
    scripted: Arc<Vec<Value>>,
    /// Decoded frames received from the client socket.
    client_frames: mpsc::Sender<Value>,
    /// Close the socket as soon as the script has been sent.
    close_after_script: bool,
}

async fn create_session() -> Json<Value> {
    Json(json!({"session_id": "sess-1"}))
}

async fn post_message(
    State(gateway): State<Gateway>,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let text = body["text"].as_str().unwrap_or_default().to_owned();
    gateway.texts.lock().unwrap().push(text);
    Json(json!({"status": "queued"}))
}

async fn avatar_connect(
    State(gateway): State<Gateway>,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let sdp = body["client_sdp"].as_str().unwrap_or_default().to_owned();
    gateway
        .avatar_calls
        .lock()
        .unwrap()
        .push(format!("connect:{sdp}"));
    Json(json!({"server_sdp": "v=0 mock-answer"}))
}

async fn avatar_disconnect(
    State(gateway): State<Gateway>,
    Path(_id): Path<String>,
) -> Json<Value> {
    gateway
        .avatar_calls
        .lock()
        .unwrap()
        .push("disconnect".to_owned());
    Json(json!({"success": true}))
}

async fn ws_handler(
    State(gateway): State<Gateway>,
    Path(_id): Path<String>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

async fn handle_socket(mut socket: WebSocket, gateway: Gateway) {
    for frame in gateway.scripted.iter() {
        if socket
            .send(Message::Text(frame.to_string().into()))
            .await
            .is_err()
        {
            return;
        }
    }
    if gateway.close_after_script {
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                let _ = gateway.client_frames.send(value).await;
            }
        }
    }
}

struct TestGateway {
    base_url: String,
    texts: Arc<Mutex<Vec<String>>>,
    avatar_calls: Arc<Mutex<Vec<String>>>,
    client_frames: mpsc::Receiver<Value>,
}

async fn spawn_gateway(scripted: Vec<Value>, close_after_script: bool) -> TestGateway {
    let texts = Arc::new(Mutex::new(Vec::new()));
    let avatar_calls = Arc::new(Mutex::new(Vec::new()));
    let (frames_tx, frames_rx) = mpsc::channel(64);
    let gateway = Gateway {
        texts: texts.clone(),
        avatar_calls: avatar_calls.clone(),
        scripted: Arc::new(scripted),
        client_frames: frames_tx,
        close_after_script,
    };

    let app = Router::new()
        .route("/session", post(create_session))
        .route("/session/{id}/message", post(post_message))
        .route("/session/{id}/avatar/connect", post(avatar_connect))
        .route("/session/{id}/avatar/disconnect", post(avatar_disconnect))
        .route("/ws/{id}", any(ws_handler))
        .with_state(gateway);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock gateway");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock gateway serve");
    });

    TestGateway {
        base_url: format!("http://{addr}"),
        texts,
        avatar_calls,
        client_frames: frames_rx,
    }
}

fn profile() -> AgentProfile {
    AgentProfile::new("agent-1", "gpt-4o-mini", "Be helpful.")
}

async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event stream closed")
}

async fn next_client_frame(rx: &mut mpsc::Receiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for client frame")
        .expect("client frame stream closed")
}

/// Capture source driven by the test through a shared callback slot.
#[derive(Default)]
struct ScriptedSource {
    callback: Arc<Mutex<Option<FrameCallback>>>,
}

impl CaptureSource for ScriptedSource {
    fn start(
        &mut self,
        _settings: &CaptureSettings,
        on_frame: FrameCallback,
    ) -> Result<(), MediaError> {
        *self.callback.lock().unwrap() = Some(on_frame);
        Ok(())
    }

    fn stop(&mut self) {
        self.callback.lock().unwrap().take();
    }
}

struct FakeConnection;

#[async_trait::async_trait]
impl MediaConnection for FakeConnection {
    async fn add_receive_transceiver(&mut self, _kind: MediaKind) -> Result<(), MediaError> {
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<String, MediaError> {
        Ok("v=0 client-offer".to_owned())
    }

    async fn apply_answer(&mut self, sdp: &str) -> Result<(), MediaError> {
        assert_eq!(sdp, "v=0 mock-answer");
        Ok(())
    }

    async fn close(&mut self) {}
}

struct FakeConnector;

impl MediaConnector for FakeConnector {
    fn open(
        &self,
        _ice_servers: &[confab_protocol::IceServer],
    ) -> Result<Box<dyn MediaConnection>, MediaError> {
        Ok(Box::new(FakeConnection))
    }
}

#[derive(Default)]
struct FakeSink;

impl MediaSink for FakeSink {
    fn attach_video(&mut self) -> Result<(), MediaError> {
        Ok(())
    }

    fn attach_audio(&mut self) -> Result<(), MediaError> {
        Ok(())
    }

    fn detach_all(&mut self) {}
}

#[tokio::test]
async fn start_routes_transcript_events_into_turns() {
    let gateway = spawn_gateway(
        vec![
            json!({"type": "session_ready", "session_id": "sess-1"}),
            json!({"type": "user_transcript_completed", "transcript": "hello there"}),
            json!({"type": "assistant_transcript_delta", "delta": "Hi"}),
            json!({"type": "assistant_transcript_delta", "delta": "! How can I help?"}),
            json!({"type": "assistant_transcript_done"}),
        ],
        false,
    )
    .await;

    let api = ApiClient::new(&gateway.base_url).unwrap();
    let session = Session::builder(profile(), api).build();
    let mut events = session.subscribe();

    let session_id = session.start().await.expect("start should succeed");
    assert_eq!(session_id, "sess-1");
    assert_eq!(session.session_id().await.as_deref(), Some("sess-1"));

    let mut completed = Vec::new();
    while completed.len() < 2 {
        if let SessionEvent::TurnCompleted(turn) = next_event(&mut events).await {
            completed.push(turn);
        }
    }

    assert_eq!(completed[0].role, Role::User);
    assert_eq!(completed[0].text, "hello there");
    assert_eq!(completed[1].role, Role::Assistant);
    assert_eq!(completed[1].text, "Hi! How can I help?");

    assert_eq!(session.channel_state().await, ChannelState::Connected);
    let recent = session.recent_turns().await;
    assert_eq!(recent.len(), 2);

    session.close().await;
}

#[tokio::test]
async fn send_text_posts_to_message_endpoint() {
    let gateway = spawn_gateway(Vec::new(), false).await;
    let api = ApiClient::new(&gateway.base_url).unwrap();
    let session = Session::builder(profile(), api).build();

    session.start().await.unwrap();
    session.send_text("typed message").await.unwrap();

    assert_eq!(*gateway.texts.lock().unwrap(), vec!["typed message"]);
    session.close().await;
}

#[tokio::test]
async fn capture_streams_chunks_and_commits_on_stop() {
    let mut gateway = spawn_gateway(Vec::new(), false).await;
    let callback = Arc::new(Mutex::new(None));
    let source = ScriptedSource {
        callback: callback.clone(),
    };

    let api = ApiClient::new(&gateway.base_url).unwrap();
    let session = Session::builder(profile(), api)
        .capture_source(Box::new(source))
        .build();

    session.start().await.unwrap();
    session.start_capture().await.unwrap();
    assert!(session.is_capturing().await);

    {
        let samples = vec![0.25_f32; 4096];
        let mut guard = callback.lock().unwrap();
        let on_frame = guard.as_mut().expect("capture running");
        on_frame(samples.as_slice());
    }

    let frame = next_client_frame(&mut gateway.client_frames).await;
    assert_eq!(frame["type"], "audio_chunk");
    assert!(!frame["audio"].as_str().unwrap().is_empty());

    session.stop_capture().await;
    assert!(!session.is_capturing().await);

    let frame = next_client_frame(&mut gateway.client_frames).await;
    assert_eq!(frame["type"], "commit_audio");

    session.close().await;
}

#[tokio::test]
async fn avatar_negotiates_through_gateway_endpoints() {
    let gateway = spawn_gateway(Vec::new(), false).await;
    let api = ApiClient::new(&gateway.base_url).unwrap();
    let session = Session::builder(profile(), api)
        .media_stack(Box::new(FakeConnector), Box::new(FakeSink))
        .build();

    session.start().await.unwrap();
    session.connect_avatar().await.expect("negotiation should succeed");
    assert_eq!(
        session.avatar_state().await,
        Some(confab_media::AvatarState::Negotiating)
    );

    session.notify_avatar_track(MediaKind::Video).await;
    assert_eq!(
        session.avatar_state().await,
        Some(confab_media::AvatarState::Connected)
    );

    session.disconnect_avatar().await;
    assert_eq!(
        session.avatar_state().await,
        Some(confab_media::AvatarState::Idle)
    );

    let calls = gateway.avatar_calls.lock().unwrap().clone();
    assert_eq!(calls, vec!["connect:v=0 client-offer", "disconnect"]);

    session.close().await;
}

#[tokio::test]
async fn server_close_marks_session_disconnected_without_cascade() {
    let gateway = spawn_gateway(
        vec![json!({"type": "user_transcript_completed", "transcript": "only turn"})],
        true,
    )
    .await;

    let callback = Arc::new(Mutex::new(None));
    let source = ScriptedSource {
        callback: callback.clone(),
    };
    let api = ApiClient::new(&gateway.base_url).unwrap();
    let session = Session::builder(profile(), api)
        .capture_source(Box::new(source))
        .build();
    let mut events = session.subscribe();

    session.start().await.unwrap();
    session.start_capture().await.unwrap();

    loop {
        if let SessionEvent::ChannelState(ChannelState::Disconnected) =
            next_event(&mut events).await
        {
            break;
        }
    }
    assert_eq!(session.channel_state().await, ChannelState::Disconnected);

    // No implicit cascade: capture is still running, its frames now drop.
    assert!(session.is_capturing().await);
    {
        let samples = vec![0.1_f32; 4096];
        let mut guard = callback.lock().unwrap();
        let on_frame = guard.as_mut().expect("capture still running");
        on_frame(samples.as_slice());
    }

    // Turns received before the close are retained.
    assert_eq!(session.history().await.len(), 1);

    session.stop_capture().await;
    assert!(!session.is_capturing().await);
}
