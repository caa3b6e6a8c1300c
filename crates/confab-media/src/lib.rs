//! Media pipelines for a confab session.
//!
//! Two independently-timed concerns live here: microphone capture framed
//! into outbound audio envelopes, and the avatar peer-connection lifecycle
//! (offer/answer negotiation plus supervision of the resulting media
//! stream). Both keep the platform stack behind traits — [`CaptureSource`]
//! for the audio device, [`transport`] for the peer connection and sinks —
//! so the state machines are testable with injected fakes and embedders
//! can plug in whatever media backend their platform provides.

pub mod avatar;
pub mod capture;
pub mod error;
pub mod transport;

pub use avatar::{AvatarNegotiator, AvatarState};
pub use capture::{
    audio_chunk_command, pcm16_bytes, CapturePipeline, CaptureSettings, CaptureSource,
    FrameCallback, FrameSender, SampleChunker, CHUNK_SAMPLES, SAMPLE_RATE,
};
pub use error::MediaError;
pub use transport::{
    MediaConnection, MediaConnector, MediaKind, MediaSink, NegotiationEndpoint, TransportState,
};

#[cfg(feature = "device-capture")]
pub use capture::device::DeviceCaptureSource;
