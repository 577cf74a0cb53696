//! Transcription relay: forwards queued audio to the transcriber.

use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use voxbridge_core::error::{RelayError, Result};
use voxbridge_core::protocol::AudioChunk;

/// Counters reported when the relay finishes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayStats {
    pub audio_chunks: usize,
    pub control_messages: usize,
    /// Whether the close-stream message was forwarded.
    pub closed: bool,
}

/// Forward audio chunks to `sink` in queue order until the close signal.
///
/// Audio goes out as binary frames, control text and the close signal as text
/// frames. The relay stops right after forwarding the close signal, so nothing
/// ever follows it. The sink is left open so the transcriber can flush its
/// final results on the read half.
pub async fn run_relay<S>(
    mut audio_rx: mpsc::UnboundedReceiver<AudioChunk>,
    mut sink: S,
    cancel: CancellationToken,
) -> Result<RelayStats>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut stats = RelayStats::default();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Transcription relay cancelled");
                break;
            }
            chunk = audio_rx.recv() => chunk,
        };

        let (frame, is_close) = match chunk {
            Some(AudioChunk::Audio(bytes)) => {
                stats.audio_chunks += 1;
                (Message::Binary(bytes.into()), false)
            }
            Some(AudioChunk::Control(text)) => {
                stats.control_messages += 1;
                (Message::Text(text.into()), false)
            }
            // A dropped sender means ingest is gone; close the same way.
            Some(AudioChunk::Close) | None => (Message::Text(AudioChunk::close_message().into()), true),
        };

        sink.send(frame)
            .await
            .map_err(|e| RelayError::Transcriber(format!("Send failed: {e}")))?;

        if is_close {
            stats.closed = true;
            break;
        }
    }

    info!(
        audio_chunks = stats.audio_chunks,
        closed = stats.closed,
        "Transcription relay finished"
    );
    Ok(stats)
}
