//! Microphone capture and outbound audio framing.
//!
//! The device delivers 32-bit float frames on its own hardware clock. Each
//! frame is converted to little-endian PCM16, accumulated to a fixed chunk
//! boundary, base64-encoded, and wrapped in an `audio_chunk` envelope —
//! all inside the device callback, whose only synchronized action is a
//! non-blocking enqueue. Real-time audio that cannot be delivered
//! immediately is stale, so undeliverable frames are dropped, never
//! buffered.

use crate::error::MediaError;
use base64::Engine;
use confab_protocol::{encode_command, ClientCommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capture sample rate in Hz (mono PCM16 on the wire).
pub const SAMPLE_RATE: u32 = 24_000;

/// Samples per outbound audio chunk.
pub const CHUNK_SAMPLES: usize = 4_096;

/// Device configuration for one capture run.
///
/// The DSP flags describe the processing requested from the platform audio
/// stack; capture backends pass them through where the platform exposes
/// them.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub chunk_samples: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            chunk_samples: CHUNK_SAMPLES,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
        }
    }
}

/// Callback invoked from the device clock with each captured float frame.
pub type FrameCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Exclusive microphone acquisition seam.
pub trait CaptureSource: Send {
    /// Acquires the device and begins delivering frames to `on_frame`.
    /// Fails without side effects when the device cannot be acquired.
    fn start(
        &mut self,
        settings: &CaptureSettings,
        on_frame: FrameCallback,
    ) -> Result<(), MediaError>;

    /// Releases the device. Must succeed even if it already vanished, and
    /// must be safe to call repeatedly.
    fn stop(&mut self);
}

/// Handle used by the capture callback to enqueue pre-built envelopes.
///
/// `try_send` only — the device callback must never block on network I/O.
/// Frames produced while the channel is not connected, or while the
/// outbound queue is full, are dropped.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
}

impl FrameSender {
    pub fn new(tx: mpsc::Sender<String>, connected: Arc<AtomicBool>) -> Self {
        Self { tx, connected }
    }

    /// Enqueues one encoded frame. Returns whether it was accepted.
    pub fn send_frame(&self, frame: String) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(err) => {
                tracing::trace!(error = %err, "dropping audio frame");
                false
            }
        }
    }
}

/// Converts float samples to little-endian PCM16 bytes, clamping to
/// [-1, 1] and scaling to the signed 16-bit range.
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Builds the `audio_chunk` command for one chunk of float samples.
pub fn audio_chunk_command(samples: &[f32]) -> ClientCommand {
    let audio = base64::engine::general_purpose::STANDARD.encode(pcm16_bytes(samples));
    ClientCommand::AudioChunk { audio }
}

/// Accumulates float samples and yields whole chunks at fixed frame
/// boundaries. The tail shorter than one chunk stays buffered.
#[derive(Debug)]
pub struct SampleChunker {
    chunk_samples: usize,
    buffer: Vec<f32>,
}

impl SampleChunker {
    pub fn new(chunk_samples: usize) -> Self {
        Self {
            chunk_samples,
            buffer: Vec::with_capacity(chunk_samples),
        }
    }

    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(samples);
        let mut chunks = Vec::new();
        while self.buffer.len() >= self.chunk_samples {
            chunks.push(self.buffer.drain(..self.chunk_samples).collect());
        }
        chunks
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Captures microphone input and forwards framed audio envelopes while the
/// channel is connected. Exactly one may be active per session.
pub struct CapturePipeline {
    source: Box<dyn CaptureSource>,
    settings: CaptureSettings,
    outbound: Option<FrameSender>,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn CaptureSource>) -> Self {
        Self::with_settings(source, CaptureSettings::default())
    }

    pub fn with_settings(source: Box<dyn CaptureSource>, settings: CaptureSettings) -> Self {
        Self {
            source,
            settings,
            outbound: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.outbound.is_some()
    }

    /// Acquires the device and starts streaming envelopes through
    /// `outbound`. A second start while active is rejected and leaves the
    /// running capture untouched.
    pub fn start(&mut self, outbound: FrameSender) -> Result<(), MediaError> {
        if self.outbound.is_some() {
            return Err(MediaError::CaptureActive);
        }

        let mut chunker = SampleChunker::new(self.settings.chunk_samples);
        let sender = outbound.clone();
        let on_frame: FrameCallback = Box::new(move |samples| {
            for chunk in chunker.push(samples) {
                match encode_command(&audio_chunk_command(&chunk)) {
                    Ok(frame) => {
                        sender.send_frame(frame);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to serialize audio chunk");
                    }
                }
            }
        });

        self.source.start(&self.settings, on_frame)?;
        self.outbound = Some(outbound);
        tracing::info!(
            sample_rate = self.settings.sample_rate,
            chunk_samples = self.settings.chunk_samples,
            "audio capture started"
        );
        Ok(())
    }

    /// Releases the device and processing state. Idempotent and always
    /// succeeds. When the channel is connected, enqueues one
    /// end-of-utterance commit.
    pub fn stop(&mut self) {
        let Some(outbound) = self.outbound.take() else {
            return;
        };
        self.source.stop();

        match encode_command(&ClientCommand::CommitAudio) {
            Ok(frame) => {
                outbound.send_frame(frame);
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize audio commit");
            }
        }
        tracing::info!("audio capture stopped");
    }
}

/// cpal-backed capture source, compiled with the `device-capture` feature.
#[cfg(feature = "device-capture")]
pub mod device {
    use super::{CaptureSettings, CaptureSource, FrameCallback};
    use crate::error::MediaError;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    /// Wrapper for cpal::Stream to make it Send.
    ///
    /// SAFETY: the stream is owned by one `CapturePipeline` and only
    /// created/dropped from its methods, never touched concurrently.
    struct SendableStream(cpal::Stream);

    unsafe impl Send for SendableStream {}

    /// Captures mono float frames from the system's default input device.
    ///
    /// The DSP flags in [`CaptureSettings`] are applied by the platform
    /// audio stack's processing chain; cpal itself exposes no per-stream
    /// toggles for them.
    #[derive(Default)]
    pub struct DeviceCaptureSource {
        stream: Option<SendableStream>,
    }

    impl DeviceCaptureSource {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl CaptureSource for DeviceCaptureSource {
        fn start(
            &mut self,
            settings: &CaptureSettings,
            mut on_frame: FrameCallback,
        ) -> Result<(), MediaError> {
            if self.stream.is_some() {
                return Err(MediaError::CaptureActive);
            }

            let host = cpal::default_host();
            let device = host.default_input_device().ok_or_else(|| {
                MediaError::CaptureUnavailable("no input device available".to_owned())
            })?;

            let config = cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(settings.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| on_frame(data),
                    |err| tracing::warn!(error = %err, "audio input stream error"),
                    None,
                )
                .map_err(|err| {
                    MediaError::CaptureUnavailable(format!("failed to build input stream: {err}"))
                })?;

            stream.play().map_err(|err| {
                MediaError::CaptureUnavailable(format!("failed to start input stream: {err}"))
            })?;

            self.stream = Some(SendableStream(stream));
            Ok(())
        }

        fn stop(&mut self) {
            // Dropping the stream releases the device; a device that already
            // vanished has nothing left to release.
            self.stream.take();
        }
    }
}
