//! Duplex channel client.
//!
//! One WebSocket per session. A writer task drains a bounded outbound
//! queue into the socket; a reader task decodes inbound text frames and
//! delivers them (plus a final `Closed` marker) to the session's event
//! pump. Producers use `try_send`, so a slow or closed socket costs them a
//! dropped frame, never a stall.

use crate::error::SessionError;
use confab_media::FrameSender;
use confab_protocol::{decode_frame, InboundFrame};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Bounded queue sizes. 256 outbound slots absorb normal audio burstiness;
/// past that the socket is too slow and frames are dropped.
const OUTBOUND_QUEUE: usize = 256;
const INBOUND_QUEUE: usize = 256;

/// Connection state of the duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Items delivered by the channel reader.
#[derive(Debug)]
pub enum ChannelItem {
    Frame(InboundFrame),
    Closed,
}

/// An open duplex channel.
pub struct DuplexChannel {
    outbound: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl DuplexChannel {
    /// Whether the socket is still believed open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// A handle for enqueueing outbound text frames.
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.outbound.clone()
    }

    /// A non-blocking audio frame handle gated on the connected flag.
    pub fn frame_sender(&self) -> FrameSender {
        FrameSender::new(self.outbound.clone(), self.connected.clone())
    }

    /// Closes the channel. Idempotent: repeated calls (or calls after the
    /// remote side already closed) do nothing further.
    pub fn close(&mut self) {
        self.connected.store(false, Ordering::Release);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Opens the channel and spawns its reader and writer tasks. Returns the
/// channel handle and the inbound item stream for the session's pump.
pub async fn open_channel(
    url: &str,
) -> Result<(DuplexChannel, mpsc::Receiver<ChannelItem>), SessionError> {
    let (socket, _response) = connect_async(url)
        .await
        .map_err(|err| SessionError::Channel(format!("failed to open duplex channel: {err}")))?;
    tracing::debug!(%url, "duplex channel open");

    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let (inbound_tx, inbound_rx) = mpsc::channel::<ChannelItem>(INBOUND_QUEUE);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let connected = Arc::new(AtomicBool::new(true));

    // Writer: forwards queued frames until shutdown or a send failure.
    let writer_connected = connected.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(err) = sink.send(Message::Text(frame.into())).await {
                            tracing::warn!(error = %err, "duplex channel send failed");
                            break;
                        }
                    }
                    None => break,
                },
                _ = &mut shutdown_rx => break,
            }
        }
        writer_connected.store(false, Ordering::Release);
        let _ = sink.close().await;
    });

    // Reader: decodes text frames; the decode itself never fails, so every
    // frame reaches the pump for typed dispatch or logging.
    let reader_connected = connected.clone();
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let frame = decode_frame(text.as_str());
                    if inbound_tx.send(ChannelItem::Frame(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "duplex channel read failed");
                    break;
                }
            }
        }
        reader_connected.store(false, Ordering::Release);
        let _ = inbound_tx.send(ChannelItem::Closed).await;
    });

    Ok((
        DuplexChannel {
            outbound: outbound_tx,
            connected,
            shutdown: Some(shutdown_tx),
        },
        inbound_rx,
    ))
}
