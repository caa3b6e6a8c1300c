//! Session orchestration.
//!
//! One [`Session`] owns one conversation: the duplex channel, the
//! transcript log, at most one capture pipeline, and at most one avatar
//! negotiator. Every state transition — inbound envelopes, capture
//! control, avatar control — is serialized through the session lock, so no
//! two handlers run concurrently. The audio device callback is the one
//! exception by design: it never takes the lock, it only `try_send`s
//! pre-built envelopes into the channel's outbound queue.

use crate::api::{ApiClient, AvatarEndpoint};
use crate::channel::{open_channel, ChannelItem, ChannelState, DuplexChannel};
use crate::error::SessionError;
use crate::profile::AgentProfile;
use confab_media::{
    AvatarNegotiator, AvatarState, CapturePipeline, CaptureSource, FrameSender, MediaConnector,
    MediaError, MediaKind, MediaSink, TransportState,
};
use confab_protocol::{ice_servers_from_payload, InboundFrame, ServerEvent};
use confab_transcript::{ConversationTurn, DeltaOutcome, TranscriptLog};
use serde_json::Value;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Capacity of the observer broadcast stream.
const EVENT_CAPACITY: usize = 64;

/// Notifications fanned out to session observers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ChannelState(ChannelState),
    TurnCompleted(ConversationTurn),
    /// Snapshot of the accumulated streaming assistant text. Emitted only
    /// when a delta actually changed it.
    StreamingUpdated { text: String },
    StreamingCleared,
    AvatarState(AvatarState),
    ServerError { detail: String },
}

struct SessionInner {
    session_id: Option<String>,
    channel_state: ChannelState,
    channel: Option<DuplexChannel>,
    transcript: TranscriptLog,
    capture: Option<CapturePipeline>,
    negotiator: Option<AvatarNegotiator>,
    pump: Option<JoinHandle<()>>,
    started: bool,
}

/// Builder for a [`Session`]. The capture source and media stack are
/// optional: a session without them still runs the text/transcript side,
/// and the corresponding operations report their absence.
pub struct SessionBuilder {
    profile: AgentProfile,
    api: ApiClient,
    capture: Option<CapturePipeline>,
    negotiator: Option<AvatarNegotiator>,
}

impl SessionBuilder {
    pub fn capture_source(mut self, source: Box<dyn CaptureSource>) -> Self {
        self.capture = Some(CapturePipeline::new(source));
        self
    }

    pub fn capture_pipeline(mut self, pipeline: CapturePipeline) -> Self {
        self.capture = Some(pipeline);
        self
    }

    pub fn media_stack(mut self, connector: Box<dyn MediaConnector>, sink: Box<dyn MediaSink>) -> Self {
        self.negotiator = Some(AvatarNegotiator::new(connector, sink));
        self
    }

    pub fn build(self) -> Session {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Session {
            profile: self.profile,
            api: Arc::new(self.api),
            events,
            inner: Arc::new(Mutex::new(SessionInner {
                session_id: None,
                channel_state: ChannelState::Disconnected,
                channel: None,
                transcript: TranscriptLog::new(),
                capture: self.capture,
                negotiator: self.negotiator,
                pump: None,
                started: false,
            })),
        }
    }
}

/// One conversation with the remote agent.
pub struct Session {
    profile: AgentProfile,
    api: Arc<ApiClient>,
    inner: Arc<Mutex<SessionInner>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn builder(profile: AgentProfile, api: ApiClient) -> SessionBuilder {
        SessionBuilder {
            profile,
            api,
            capture: None,
            negotiator: None,
        }
    }

    /// Subscribes to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Starts the session: validates the agent configuration, requests a
    /// session identifier, and opens the duplex channel. Returns the
    /// session identifier. Exactly one channel exists per session; a second
    /// start is rejected.
    pub async fn start(&self) -> Result<String, SessionError> {
        self.profile.validate()?;

        let mut inner = self.inner.lock().await;
        if inner.started {
            return Err(SessionError::Channel(
                "session already started; create a new session to reconnect".to_owned(),
            ));
        }
        inner.started = true;
        inner.channel_state = ChannelState::Connecting;
        self.emit(SessionEvent::ChannelState(ChannelState::Connecting));

        let session_id = match self.api.create_session().await {
            Ok(id) => id,
            Err(err) => {
                // A start that never opened a channel may be retried.
                inner.started = false;
                inner.channel_state = ChannelState::Disconnected;
                self.emit(SessionEvent::ChannelState(ChannelState::Disconnected));
                return Err(err);
            }
        };

        let url = self.api.channel_url(&session_id);
        let (channel, inbound) = match open_channel(&url).await {
            Ok(opened) => opened,
            Err(err) => {
                inner.started = false;
                inner.channel_state = ChannelState::Disconnected;
                self.emit(SessionEvent::ChannelState(ChannelState::Disconnected));
                return Err(err);
            }
        };

        inner.session_id = Some(session_id.clone());
        inner.channel = Some(channel);
        inner.channel_state = ChannelState::Connected;
        self.emit(SessionEvent::ChannelState(ChannelState::Connected));
        tracing::info!(session_id = %session_id, "session started");

        inner.pump = Some(tokio::spawn(run_pump(
            self.inner.clone(),
            self.events.clone(),
            inbound,
        )));

        Ok(session_id)
    }

    /// Posts a user text message. Blank text performs no network call. The
    /// echoed turn, if the remote side emits one, arrives asynchronously
    /// via transcript events.
    pub async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let session_id = {
            let inner = self.inner.lock().await;
            inner.session_id.clone()
        }
        .ok_or(SessionError::NoSession)?;

        self.api.send_text(&session_id, text).await
    }

    /// Starts microphone capture. While the channel is connected each chunk
    /// goes out as an audio envelope; otherwise chunks are dropped.
    pub async fn start_capture(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let sender = inner.frame_sender();
        let capture = inner.capture.as_mut().ok_or_else(|| {
            MediaError::CaptureUnavailable("no capture source configured".to_owned())
        })?;
        capture.start(sender)?;
        Ok(())
    }

    /// Stops microphone capture and commits the utterance if the channel is
    /// connected. Idempotent.
    pub async fn stop_capture(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(capture) = inner.capture.as_mut() {
            capture.stop();
        }
    }

    /// Negotiates the avatar media connection.
    pub async fn connect_avatar(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let session_id = inner.session_id.clone().ok_or(SessionError::NoSession)?;
        let endpoint = AvatarEndpoint::new(self.api.clone(), session_id);
        let negotiator = inner.negotiator.as_mut().ok_or_else(|| {
            MediaError::Negotiation("no media stack configured".to_owned())
        })?;

        let result = negotiator.connect(&endpoint).await;
        let state = negotiator.state();
        self.emit(SessionEvent::AvatarState(state));
        result.map_err(Into::into)
    }

    /// Releases the avatar media connection. Safe from any state.
    pub async fn disconnect_avatar(&self) {
        let mut inner = self.inner.lock().await;
        let Some(session_id) = inner.session_id.clone() else {
            return;
        };
        let Some(negotiator) = inner.negotiator.as_mut() else {
            return;
        };
        let endpoint = AvatarEndpoint::new(self.api.clone(), session_id);
        negotiator.disconnect(&endpoint).await;
        let state = negotiator.state();
        self.emit(SessionEvent::AvatarState(state));
    }

    /// Feeds an inbound track arrival from the embedder's media stack into
    /// the negotiator.
    pub async fn notify_avatar_track(&self, kind: MediaKind) {
        let mut inner = self.inner.lock().await;
        if let Some(negotiator) = inner.negotiator.as_mut() {
            negotiator.handle_track(kind);
            let state = negotiator.state();
            self.emit(SessionEvent::AvatarState(state));
        }
    }

    /// Feeds a transport connection-state change from the embedder's media
    /// stack into the negotiator.
    pub async fn notify_avatar_transport_state(&self, state: TransportState) {
        let mut inner = self.inner.lock().await;
        if let Some(negotiator) = inner.negotiator.as_mut() {
            negotiator.handle_transport_state(state).await;
            let avatar_state = negotiator.state();
            self.emit(SessionEvent::AvatarState(avatar_state));
        }
    }

    /// Atomically empties the turn history and any in-flight streaming
    /// turn. Channel and media state are untouched.
    pub async fn clear_history(&self) {
        let mut inner = self.inner.lock().await;
        inner.transcript.clear();
        self.emit(SessionEvent::StreamingCleared);
    }

    /// Closes the duplex channel. Capture and avatar resources are released
    /// by their own stop/disconnect operations; closing the channel does
    /// not cascade into them.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut channel) = inner.channel.take() {
            channel.close();
        }
        if inner.channel_state != ChannelState::Disconnected {
            inner.channel_state = ChannelState::Disconnected;
            self.emit(SessionEvent::ChannelState(ChannelState::Disconnected));
        }
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
    }

    pub async fn session_id(&self) -> Option<String> {
        self.inner.lock().await.session_id.clone()
    }

    pub async fn channel_state(&self) -> ChannelState {
        self.inner.lock().await.channel_state
    }

    pub async fn avatar_state(&self) -> Option<AvatarState> {
        self.inner.lock().await.negotiator.as_ref().map(|n| n.state())
    }

    pub async fn is_capturing(&self) -> bool {
        self.inner
            .lock()
            .await
            .capture
            .as_ref()
            .is_some_and(|c| c.is_active())
    }

    /// The recent turn window (the last few turns of the history).
    pub async fn recent_turns(&self) -> Vec<ConversationTurn> {
        self.inner.lock().await.transcript.recent().to_vec()
    }

    /// The full (periodically trimmed) turn history.
    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.inner.lock().await.transcript.history().to_vec()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl SessionInner {
    /// An audio frame handle for the current channel, or a detached one
    /// whose frames all drop when no channel is open.
    fn frame_sender(&self) -> FrameSender {
        match &self.channel {
            Some(channel) => channel.frame_sender(),
            None => {
                let (tx, _rx) = mpsc::channel(1);
                FrameSender::new(tx, Arc::new(AtomicBool::new(false)))
            }
        }
    }
}

/// The session's single event pump: every inbound envelope is dispatched
/// under the session lock, one at a time, until the channel closes.
async fn run_pump(
    inner: Arc<Mutex<SessionInner>>,
    events: broadcast::Sender<SessionEvent>,
    mut inbound: mpsc::Receiver<ChannelItem>,
) {
    while let Some(item) = inbound.recv().await {
        match item {
            ChannelItem::Frame(frame) => {
                let mut state = inner.lock().await;
                dispatch_frame(&mut state, &events, frame).await;
            }
            ChannelItem::Closed => {
                let mut state = inner.lock().await;
                if let Some(mut channel) = state.channel.take() {
                    channel.close();
                }
                state.channel_state = ChannelState::Disconnected;
                let _ = events.send(SessionEvent::ChannelState(ChannelState::Disconnected));
                tracing::info!("duplex channel closed");
                // Capture and negotiator are left to their owners: teardown
                // is explicit, and a disconnected channel only makes audio
                // frames drop.
                break;
            }
        }
    }
}

async fn dispatch_frame(
    state: &mut SessionInner,
    events: &broadcast::Sender<SessionEvent>,
    frame: InboundFrame,
) {
    let event = match frame {
        InboundFrame::Event(event) => event,
        InboundFrame::Unrecognized { kind, .. } => {
            tracing::debug!(
                kind = kind.as_deref().unwrap_or("<none>"),
                "ignoring unrecognized channel event"
            );
            return;
        }
    };

    match event {
        ServerEvent::UserTranscriptCompleted { transcript, .. } => {
            let text = transcript.unwrap_or_default();
            let turn = state.transcript.user_completed(&text).clone();
            let _ = events.send(SessionEvent::StreamingCleared);
            let _ = events.send(SessionEvent::TurnCompleted(turn));
        }
        ServerEvent::AssistantTranscriptDelta { delta, .. } => {
            let Some(delta) = delta else { return };
            if state.transcript.assistant_delta(&delta) == DeltaOutcome::Applied {
                let text = state
                    .transcript
                    .streaming_text()
                    .unwrap_or_default()
                    .to_owned();
                let _ = events.send(SessionEvent::StreamingUpdated { text });
            }
        }
        ServerEvent::AssistantTranscriptDone { transcript, .. } => {
            let turn = state.transcript.assistant_done(transcript.as_deref()).cloned();
            let _ = events.send(SessionEvent::StreamingCleared);
            if let Some(turn) = turn {
                let _ = events.send(SessionEvent::TurnCompleted(turn));
            }
        }
        ServerEvent::SpeechStarted | ServerEvent::ResponseDone { .. } => {
            state.transcript.interrupt();
            let _ = events.send(SessionEvent::StreamingCleared);
        }
        ServerEvent::AvatarConnecting => {
            tracing::debug!("server reports avatar negotiation in progress");
        }
        ServerEvent::AvatarConnected => {
            // Informational: the authoritative connected signal is the
            // inbound video track on the media transport.
            tracing::debug!("server reports avatar media established");
        }
        ServerEvent::AvatarDisconnected => {
            if let Some(negotiator) = state.negotiator.as_mut() {
                negotiator.handle_remote_teardown().await;
                let _ = events.send(SessionEvent::AvatarState(negotiator.state()));
            }
        }
        ServerEvent::Event { payload } => {
            if let Some(servers) = ice_servers_from_payload(&payload) {
                if let Some(negotiator) = state.negotiator.as_mut() {
                    negotiator.set_ice_servers(servers);
                }
            }
        }
        ServerEvent::Error { payload } => {
            let detail = error_detail(&payload);
            tracing::error!(detail = %detail, "server reported an error");
            let _ = events.send(SessionEvent::ServerError { detail });
        }
    }
}

fn error_detail(payload: &Value) -> String {
    payload
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_only_session() -> Session {
        let profile = AgentProfile::new("agent-1", "gpt-4o-mini", "Be helpful.");
        // Unroutable base: any attempted request would fail loudly, which
        // is exactly what the no-network-call tests rely on not seeing.
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        Session::builder(profile, api).build()
    }

    #[tokio::test]
    async fn blank_text_is_rejected_before_any_network_call() {
        let session = text_only_session();
        assert!(matches!(
            session.send_text("").await,
            Err(SessionError::EmptyMessage)
        ));
        assert!(matches!(
            session.send_text("   ").await,
            Err(SessionError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn text_without_session_reports_no_session() {
        let session = text_only_session();
        assert!(matches!(
            session.send_text("hello").await,
            Err(SessionError::NoSession)
        ));
    }

    #[tokio::test]
    async fn unconfigured_profile_blocks_start_before_network() {
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        let session = Session::builder(AgentProfile::default(), api).build();
        assert!(matches!(
            session.start().await,
            Err(SessionError::NotConfigured)
        ));
        assert_eq!(session.channel_state().await, ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn capture_without_source_is_unavailable() {
        let session = text_only_session();
        assert!(matches!(
            session.start_capture().await,
            Err(SessionError::Media(MediaError::CaptureUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn clear_history_empties_turns() {
        let session = text_only_session();
        {
            let mut inner = session.inner.lock().await;
            inner.transcript.user_completed("one");
            inner.transcript.assistant_delta("in flight");
        }
        session.clear_history().await;
        assert!(session.history().await.is_empty());
        assert!(session.recent_turns().await.is_empty());
    }
}
