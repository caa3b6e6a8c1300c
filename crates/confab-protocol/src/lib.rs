//! Wire protocol for the confab duplex channel.
//!
//! Each frame on the channel is a JSON object with a `type` discriminator.
//! Inbound frames decode into [`ServerEvent`]; kinds the client does not
//! recognize decode into [`InboundFrame::Unrecognized`] so a protocol
//! addition on the server side can never break an established session.
//! Outbound frames are the two producer-side commands in [`ClientCommand`].
//!
//! ICE server descriptors ride inside generic `event` envelopes at one of
//! several nesting depths; [`ice_servers_from_payload`] normalizes them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound event kinds recognized on the duplex channel.
///
/// Field shapes follow the session gateway's broadcast format: kind-specific
/// fields sit next to the `type` discriminator, optional where the server
/// may omit them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The user's utterance was transcribed to completion.
    #[serde(rename = "user_transcript_completed")]
    UserTranscriptCompleted {
        #[serde(default)]
        transcript: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },
    /// An incremental piece of the assistant's spoken transcript.
    #[serde(rename = "assistant_transcript_delta")]
    AssistantTranscriptDelta {
        #[serde(default)]
        delta: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },
    /// The assistant's transcript is final; `transcript` carries the full
    /// text when the server chooses to repeat it.
    #[serde(rename = "assistant_transcript_done")]
    AssistantTranscriptDone {
        #[serde(default)]
        transcript: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },
    /// The user started speaking (barge-in).
    #[serde(rename = "speech_started")]
    SpeechStarted,
    /// The assistant's response turn ended, with or without content.
    #[serde(rename = "response_done")]
    ResponseDone {
        #[serde(default)]
        payload: Value,
    },
    /// Avatar media negotiation is in progress on the server side.
    #[serde(rename = "avatar_connecting")]
    AvatarConnecting,
    /// The server considers the avatar media stream established.
    #[serde(rename = "avatar_connected")]
    AvatarConnected,
    /// The server tore the avatar media stream down.
    #[serde(rename = "avatar_disconnected")]
    AvatarDisconnected,
    /// Generic wrapper for session-configuration updates and other nested
    /// payloads (ICE server refreshes arrive this way).
    #[serde(rename = "event")]
    Event {
        #[serde(default)]
        payload: Value,
    },
    /// An error reported by the remote side.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        payload: Value,
    },
}

/// Result of decoding one raw frame. Decoding never fails: anything that is
/// not a recognized [`ServerEvent`] comes back as `Unrecognized` with the
/// raw payload attached for logging.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Event(ServerEvent),
    Unrecognized {
        /// The `type` discriminator, when one could be read at all.
        kind: Option<String>,
        payload: Value,
    },
}

/// Decodes one text frame from the duplex channel.
pub fn decode_frame(raw: &str) -> InboundFrame {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            return InboundFrame::Unrecognized {
                kind: None,
                payload: Value::String(raw.to_owned()),
            }
        }
    };

    match ServerEvent::deserialize(&value) {
        Ok(event) => InboundFrame::Event(event),
        Err(_) => {
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_owned);
            InboundFrame::Unrecognized {
                kind,
                payload: value,
            }
        }
    }
}

/// Outbound commands the client produces on the duplex channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    /// One fixed-size chunk of microphone audio, base64 PCM16.
    #[serde(rename = "audio_chunk")]
    AudioChunk { audio: String },
    /// End-of-utterance commit for the audio buffered so far.
    #[serde(rename = "commit_audio")]
    CommitAudio,
}

/// Encodes an outbound command as a text frame.
pub fn encode_command(command: &ClientCommand) -> Result<String, serde_json::Error> {
    serde_json::to_string(command)
}

/// Default public STUN entry used when the server never supplies ICE
/// configuration.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// One STUN/TURN server entry for peer-connection setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// The fallback entry applied when no server-provided configuration
    /// exists.
    pub fn default_stun() -> Self {
        Self {
            urls: vec![DEFAULT_STUN_URL.to_owned()],
            username: None,
            credential: None,
        }
    }
}

/// Payload locations probed for ICE server descriptors, in priority order.
const ICE_SERVER_PATHS: &[&[&str]] = &[
    &["session", "avatar", "ice_servers"],
    &["session", "ice_servers"],
    &["avatar", "ice_servers"],
    &["ice_servers"],
];

/// Extracts a normalized ICE server set from a session-configuration
/// payload.
///
/// The first path that holds a non-empty array wins. Entries whose `urls`
/// field is missing or empty are discarded; `urls` is accepted both as a
/// single string and as an array of strings. Returns `None` when no probed
/// location yields at least one valid entry, in which case the caller keeps
/// its previous configuration.
pub fn ice_servers_from_payload(payload: &Value) -> Option<Vec<IceServer>> {
    for path in ICE_SERVER_PATHS {
        let mut node = Some(payload);
        for key in *path {
            node = node.and_then(|n| n.get(key));
        }
        let list = match node.and_then(Value::as_array) {
            Some(list) if !list.is_empty() => list,
            _ => continue,
        };

        // First non-empty list wins; entries without a URL are dropped
        // during normalization, which may leave nothing usable.
        let normalized: Vec<IceServer> = list.iter().filter_map(normalize_entry).collect();
        if normalized.is_empty() {
            tracing::debug!("ice server list had no entries with a usable url");
            return None;
        }
        return Some(normalized);
    }
    None
}

fn normalize_entry(entry: &Value) -> Option<IceServer> {
    let urls: Vec<String> = match entry.get("urls") {
        Some(Value::String(url)) if !url.is_empty() => vec![url.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    };
    if urls.is_empty() {
        return None;
    }

    Some(IceServer {
        urls,
        username: entry
            .get("username")
            .and_then(Value::as_str)
            .map(str::to_owned),
        credential: entry
            .get("credential")
            .and_then(Value::as_str)
            .map(str::to_owned),
    })
}
