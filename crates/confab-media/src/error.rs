use thiserror::Error;

/// Errors raised by the capture pipeline and avatar negotiator.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The microphone could not be acquired (missing device, permission
    /// denied, unusable configuration). Capture state is unchanged.
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// A capture pipeline is already running for this session.
    #[error("capture already active")]
    CaptureActive,

    /// An avatar connection is already negotiating or established.
    #[error("avatar connection already active")]
    AvatarActive,

    /// A step of the avatar offer/answer negotiation failed. The negotiator
    /// has released partial resources and returned to idle.
    #[error("avatar negotiation failed: {0}")]
    Negotiation(String),

    /// The underlying media transport reported a failure.
    #[error("media transport error: {0}")]
    Transport(String),
}
