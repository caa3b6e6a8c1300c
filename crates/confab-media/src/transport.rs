//! Seams to the platform media stack.
//!
//! The negotiator never talks to a concrete WebRTC implementation; it
//! drives these traits. Production embedders wrap their platform's peer
//! connection and renderer, tests inject fakes.

use crate::error::MediaError;
use async_trait::async_trait;
use confab_protocol::IceServer;

/// Media kind of an inbound track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Connection state reported by the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// One live peer media connection.
#[async_trait]
pub trait MediaConnection: Send {
    /// Adds a receive-only transceiver for the given media kind.
    async fn add_receive_transceiver(&mut self, kind: MediaKind) -> Result<(), MediaError>;

    /// Produces the local SDP offer. Implementations return only after ICE
    /// candidate gathering has completed, so the offer is complete
    /// (non-trickle) — the negotiation endpoint requires one.
    async fn create_offer(&mut self) -> Result<String, MediaError>;

    /// Applies the remote answer SDP.
    async fn apply_answer(&mut self, sdp: &str) -> Result<(), MediaError>;

    /// Releases the underlying connection. Safe to call more than once.
    async fn close(&mut self);
}

/// Creates peer connections configured with a given ICE server set.
pub trait MediaConnector: Send + Sync {
    fn open(&self, ice_servers: &[IceServer]) -> Result<Box<dyn MediaConnection>, MediaError>;
}

/// Where inbound avatar tracks are rendered.
///
/// `attach_video` returns once playback has started; its success is what
/// promotes the negotiator to connected. Audio attaches to a dedicated
/// audio sink so avatar speech stays audible independent of any video
/// surface. `detach_all` must remove every bound sink even if the remote
/// side never acknowledged anything.
pub trait MediaSink: Send {
    fn attach_video(&mut self) -> Result<(), MediaError>;
    fn attach_audio(&mut self) -> Result<(), MediaError>;
    fn detach_all(&mut self);
}

/// The HTTP negotiation operations, implemented by the session API client.
#[async_trait]
pub trait NegotiationEndpoint: Send + Sync {
    /// Exchanges the complete local offer for the remote answer.
    async fn exchange_offer(&self, client_sdp: &str) -> Result<String, MediaError>;

    /// Asks the remote side to release its end. Best-effort: failures are
    /// logged by the caller and never block local teardown.
    async fn teardown(&self) -> Result<(), MediaError>;
}
