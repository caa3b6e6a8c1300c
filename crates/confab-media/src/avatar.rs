//! Avatar peer-connection lifecycle.
//!
//! State machine: `Idle → Negotiating → Connected → Idle`, with `Failed`
//! reachable from `Negotiating` as a transient reporting state and
//! `Disconnected` when the transport drops an established stream. Each
//! browser-style media callback is a named transition method here
//! ([`AvatarNegotiator::handle_track`],
//! [`AvatarNegotiator::handle_transport_state`]), so the whole lifecycle is
//! testable without a real media stack.

use crate::error::MediaError;
use crate::transport::{
    MediaConnection, MediaConnector, MediaKind, MediaSink, NegotiationEndpoint, TransportState,
};
use confab_protocol::IceServer;

/// Lifecycle state of the avatar media connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarState {
    Idle,
    Negotiating,
    Connected,
    Failed,
    Disconnected,
}

/// Runs the offer/answer handshake and supervises the resulting media
/// connection. At most one lives per session; a new `connect` is rejected
/// while one is negotiating or established.
pub struct AvatarNegotiator {
    connector: Box<dyn MediaConnector>,
    sink: Box<dyn MediaSink>,
    connection: Option<Box<dyn MediaConnection>>,
    ice_servers: Vec<IceServer>,
    state: AvatarState,
}

impl AvatarNegotiator {
    pub fn new(connector: Box<dyn MediaConnector>, sink: Box<dyn MediaSink>) -> Self {
        Self {
            connector,
            sink,
            connection: None,
            ice_servers: Vec::new(),
            state: AvatarState::Idle,
        }
    }

    pub fn state(&self) -> AvatarState {
        self.state
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    /// Replaces the ICE configuration wholesale. Takes effect on the next
    /// `connect`; an in-progress negotiation keeps the set it started with.
    pub fn set_ice_servers(&mut self, servers: Vec<IceServer>) {
        tracing::debug!(count = servers.len(), "ice server configuration replaced");
        self.ice_servers = servers;
    }

    /// Negotiates a new avatar media connection.
    ///
    /// Creates a peer connection with the current ICE configuration (or the
    /// default STUN entry when none was ever received), adds receive-only
    /// audio and video transceivers, exchanges the complete local offer for
    /// the remote answer, and applies it. Success leaves the negotiator in
    /// `Negotiating`: the transition to `Connected` happens only when the
    /// transport reports a live inbound video track, since SDP completion
    /// alone does not guarantee media flow.
    pub async fn connect(&mut self, endpoint: &dyn NegotiationEndpoint) -> Result<(), MediaError> {
        // Only from Idle: a Negotiating/Connected instance is exclusive, and
        // a Disconnected one still holds rendered media until released.
        if self.state != AvatarState::Idle {
            return Err(MediaError::AvatarActive);
        }
        self.state = AvatarState::Negotiating;
        tracing::info!("avatar negotiation started");

        match self.negotiate(endpoint).await {
            Ok(connection) => {
                self.connection = Some(connection);
                Ok(())
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn negotiate(
        &mut self,
        endpoint: &dyn NegotiationEndpoint,
    ) -> Result<Box<dyn MediaConnection>, MediaError> {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![IceServer::default_stun()]
        } else {
            self.ice_servers.clone()
        };

        let mut connection = self.connector.open(&ice_servers)?;
        match Self::run_handshake(connection.as_mut(), endpoint).await {
            Ok(()) => Ok(connection),
            Err(err) => {
                // Release the half-built connection before reporting.
                connection.close().await;
                Err(err)
            }
        }
    }

    async fn run_handshake(
        connection: &mut dyn MediaConnection,
        endpoint: &dyn NegotiationEndpoint,
    ) -> Result<(), MediaError> {
        connection.add_receive_transceiver(MediaKind::Audio).await?;
        connection.add_receive_transceiver(MediaKind::Video).await?;
        let offer = connection.create_offer().await?;
        let answer = endpoint.exchange_offer(&offer).await?;
        if answer.trim().is_empty() {
            return Err(MediaError::Negotiation(
                "negotiation endpoint returned an empty remote description".to_owned(),
            ));
        }
        connection.apply_answer(&answer).await
    }

    /// An inbound track arrived on the transport.
    ///
    /// Video binds to the sink and — once playback starts — is the
    /// authoritative connected signal. Audio binds to its dedicated sink so
    /// avatar speech is audible with or without a video surface.
    pub fn handle_track(&mut self, kind: MediaKind) {
        match kind {
            MediaKind::Video => match self.sink.attach_video() {
                Ok(()) => {
                    if self.state == AvatarState::Negotiating {
                        self.state = AvatarState::Connected;
                        tracing::info!("avatar video playing; connection established");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to attach avatar video track");
                }
            },
            MediaKind::Audio => {
                if let Err(err) = self.sink.attach_audio() {
                    tracing::warn!(error = %err, "failed to attach avatar audio track");
                }
            }
        }
    }

    /// The transport's own connection state changed outside the connect
    /// flow.
    pub async fn handle_transport_state(&mut self, transport_state: TransportState) {
        match transport_state {
            TransportState::Failed
                if matches!(self.state, AvatarState::Negotiating | AvatarState::Connected) =>
            {
                self.release_local().await;
                self.fail(&MediaError::Transport(
                    "peer connection reported failure".to_owned(),
                ));
            }
            TransportState::Disconnected => {
                // Drop the stale handle but keep rendered media; the sink is
                // cleared on explicit disconnect or remote teardown.
                self.connection = None;
                if self.state == AvatarState::Connected {
                    self.state = AvatarState::Disconnected;
                    tracing::info!("avatar transport disconnected");
                }
            }
            _ => {}
        }
    }

    /// Releases the connection and all bound sinks, asks the negotiation
    /// endpoint to release its end (best-effort), and returns to idle.
    /// Allowed from any state; safe to repeat.
    pub async fn disconnect(&mut self, endpoint: &dyn NegotiationEndpoint) {
        self.release_local().await;
        if let Err(err) = endpoint.teardown().await {
            tracing::warn!(error = %err, "avatar teardown endpoint call failed; local release already complete");
        }
        self.state = AvatarState::Idle;
        tracing::info!("avatar disconnected");
    }

    /// Server-initiated teardown: same local release as `disconnect`,
    /// without calling the teardown endpoint again.
    pub async fn handle_remote_teardown(&mut self) {
        self.release_local().await;
        self.state = AvatarState::Idle;
        tracing::info!("avatar released after remote teardown");
    }

    async fn release_local(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.sink.detach_all();
    }

    /// `Failed` is transient: enter it, report, settle at idle so a new
    /// connect can proceed.
    fn fail(&mut self, err: &MediaError) {
        self.state = AvatarState::Failed;
        tracing::warn!(error = %err, "avatar negotiation failed");
        self.sink.detach_all();
        self.state = AvatarState::Idle;
    }
}
