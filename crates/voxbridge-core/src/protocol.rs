//! Wire types for the three streaming legs of a call.
//!
//! - [`MediaFrame`]: telephony media-stream events (JSON text frames).
//! - [`TranscriptEvent`]: streaming transcriber results.
//! - [`AudioChunk`]: items on the per-connection audio queue.
//! - [`ResponseMessage`]: items on the per-call response queue.
//!
//! Every protocol is a closed enum with an explicit `Unsupported` variant so
//! callers handle unknown input exhaustively instead of through a fallthrough.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Media encoding the transcriber is opened for.
pub const EXPECTED_ENCODING: &str = "audio/x-mulaw";

/// Sample rate the transcriber is opened for.
pub const EXPECTED_SAMPLE_RATE: u32 = 8000;

/// One event from the telephony media-stream connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaFrame {
    Connected,
    Start { start: StreamStart },
    Media { media: MediaPayload },
    Stop,
    #[serde(other)]
    Unsupported,
}

impl MediaFrame {
    /// Parse a text frame. Malformed JSON or a known event with missing
    /// fields yields [`MediaFrame::Unsupported`].
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or(Self::Unsupported)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub call_sid: String,
    #[serde(default)]
    pub stream_sid: Option<String>,
    pub media_format: MediaFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: Option<u32>,
}

impl MediaFormat {
    /// Reject anything but 8 kHz mu-law, which is what the transcriber expects.
    pub fn validate(&self, call_sid: &str) -> Result<()> {
        if self.encoding == EXPECTED_ENCODING && self.sample_rate == EXPECTED_SAMPLE_RATE {
            return Ok(());
        }
        Err(RelayError::UnsupportedMediaFormat {
            call_sid: call_sid.to_string(),
            encoding: self.encoding.clone(),
            sample_rate: self.sample_rate,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded audio.
    pub payload: String,
}

impl MediaPayload {
    pub fn decode(&self) -> std::result::Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.payload)
    }
}

/// One event from the streaming transcriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// A transcription result; `text` may be empty.
    Transcript { text: String, is_final: bool },
    /// The transcriber's end-of-stream metadata, marked by a top-level `request_id`.
    StreamEnd { request_id: String },
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct RawTranscriberMessage {
    #[serde(default)]
    request_id: Option<serde_json::Value>,
    #[serde(default)]
    channel: Option<RawChannel>,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    #[serde(default)]
    alternatives: Vec<RawAlternative>,
}

#[derive(Debug, Deserialize)]
struct RawAlternative {
    #[serde(default)]
    transcript: String,
}

impl TranscriptEvent {
    pub fn parse(text: &str) -> Self {
        let Ok(raw) = serde_json::from_str::<RawTranscriberMessage>(text) else {
            return Self::Unsupported;
        };

        if let Some(id) = raw.request_id {
            let request_id = match id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            return Self::StreamEnd { request_id };
        }

        match raw.channel.and_then(|c| c.alternatives.into_iter().next()) {
            Some(alt) => Self::Transcript {
                text: alt.transcript,
                is_final: raw.is_final,
            },
            None => Self::Unsupported,
        }
    }
}

/// An item on the audio queue between media ingest and the transcription relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioChunk {
    /// Decoded audio, forwarded as a binary frame.
    Audio(Vec<u8>),
    /// A text control message, forwarded as a text frame.
    Control(String),
    /// Close signal; always the last item for a connection.
    Close,
}

#[derive(Serialize)]
struct ControlMessage<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

impl AudioChunk {
    /// The transcriber's close-stream control message.
    pub fn close_message() -> String {
        serde_json::to_string(&ControlMessage { kind: "CloseStream" })
            .unwrap_or_else(|_| r#"{"type":"CloseStream"}"#.to_string())
    }
}

/// An item on a call's response queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMessage {
    /// Text to speak; may be empty when the completion service failed.
    Speak(String),
    /// No more output; the call should end.
    End,
}
