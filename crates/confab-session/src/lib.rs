//! Session orchestration for confab.
//!
//! A [`Session`] mediates one real-time conversation with a remote
//! conversational agent: it opens the duplex event channel, routes inbound
//! envelopes to the transcript aggregator and avatar negotiator, and
//! exposes the session-level commands (send text, start/stop capture,
//! connect/disconnect avatar). The HTTP endpoints and the channel itself
//! live here; the media state machines live in `confab-media`.

mod api;
mod channel;
mod error;
mod profile;
mod session;

pub use api::{ApiClient, AvatarEndpoint};
pub use channel::{ChannelItem, ChannelState, DuplexChannel};
pub use error::SessionError;
pub use profile::AgentProfile;
pub use session::{Session, SessionBuilder, SessionEvent};

pub use confab_transcript::{ConversationTurn, Role};
