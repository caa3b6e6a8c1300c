use confab_media::MediaError;
use thiserror::Error;

/// Errors surfaced by a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Agent identity, model, or instructions are missing. User-correctable;
    /// raised before any network call.
    #[error("agent is not configured")]
    NotConfigured,

    /// The operation needs a started session.
    #[error("no active session")]
    NoSession,

    /// Blank text message; nothing was sent.
    #[error("text message is empty")]
    EmptyMessage,

    /// Duplex channel open or send failure. The session is marked
    /// disconnected; there is no automatic reconnect.
    #[error("channel error: {0}")]
    Channel(String),

    /// HTTP transport failure reaching the gateway.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("api error: {0}")]
    Api(String),

    /// Capture or avatar failure, forwarded from the media layer.
    #[error(transparent)]
    Media(#[from] MediaError),
}
