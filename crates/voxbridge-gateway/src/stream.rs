//! Media-stream WebSocket: ingest loop and per-call task supervision.
//!
//! One telephony media stream drives three tasks:
//!
//! ```text
//! telephony ──► ingest ──audio queue──► relay ──► transcriber
//!                  │                                  │
//!                  └──call sid (oneshot)──► listener ◄┘──► response queue
//! ```
//!
//! The tasks share a cancellation token. The first one to fail cancels the
//! others; once ingest has ended, the transcription leg gets
//! `transcription.drain_timeout_ms` to flush before it is cancelled too.
//! The call's queue is then finished, and dropped from the registry after
//! `gateway.session_grace_ms` if no continuation webhook took it first.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{Sink, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tokio_tungstenite::tungstenite::{self, Message as TranscriberMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use voxbridge_core::error::{RelayError, Result};
use voxbridge_core::protocol::{AudioChunk, MediaFrame};
use voxbridge_core::session::{ResponseQueue, SessionRegistry};
use voxbridge_media::{ListenerStats, RelayStats, run_listener, run_relay};

use crate::state::GatewayState;

/// Counters reported when the ingest loop finishes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub call_sid: Option<String>,
    pub media_frames: usize,
}

/// Outcome of one media session.
#[derive(Debug, Default)]
pub struct SessionSummary {
    pub ingest: Option<IngestStats>,
    pub relay: Option<RelayStats>,
    pub listener: Option<ListenerStats>,
    /// The transcription leg was cancelled after the drain deadline.
    pub drain_timed_out: bool,
}

impl SessionSummary {
    pub fn call_sid(&self) -> Option<&str> {
        self.ingest
            .as_ref()
            .and_then(|s| s.call_sid.as_deref())
            .or_else(|| self.listener.as_ref().and_then(|s| s.call_sid.as_deref()))
    }
}

/// `GET /stream`: media-stream upgrade.
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_stream(state, socket))
}

/// Run one media-stream connection to completion.
pub async fn handle_media_stream(state: Arc<GatewayState>, socket: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    let active = state.media_session_started();
    #[cfg(feature = "metrics")]
    crate::metrics::record_media_session_start();
    info!(conn_id = %conn_id, active, "Media stream connected");

    // The telephony side never receives anything from us; keep the write
    // half alive so the connection stays open until we are done.
    let (_ws_tx, ws_rx) = socket.split();

    let outcome = match state.transcriber.connect().await {
        Ok(transcriber) => {
            let (sink, transcripts) = transcriber.split();
            supervise(&state, ws_rx, sink, transcripts).await
        }
        Err(e) => {
            error!(conn_id = %conn_id, error = %e, "Transcriber unavailable, ending call once identified");
            // Keep reading so the call identifier is learned and the call's
            // queue still gets its end-marker.
            let no_transcripts =
                futures::stream::empty::<std::result::Result<TranscriberMessage, tungstenite::Error>>();
            supervise(&state, ws_rx, futures::sink::drain(), no_transcripts)
                .await
                .and_then(|_| Err(e))
        }
    };

    match outcome {
        Ok(summary) => {
            info!(
                conn_id = %conn_id,
                call_sid = summary.call_sid().unwrap_or("-"),
                media_frames = summary.ingest.as_ref().map_or(0, |s| s.media_frames),
                completions = summary.listener.as_ref().map_or(0, |s| s.completions),
                drain_timed_out = summary.drain_timed_out,
                "Media session finished"
            );
        }
        Err(e) => {
            #[cfg(feature = "metrics")]
            crate::metrics::record_session_aborted(e.kind());
            warn!(
                conn_id = %conn_id,
                call_sid = e.call_sid().unwrap_or("-"),
                kind = e.kind(),
                error = %e,
                "Media session aborted"
            );
        }
    }

    let active = state.media_session_ended();
    #[cfg(feature = "metrics")]
    crate::metrics::record_media_session_end();
    debug!(conn_id = %conn_id, active, "Media stream closed");
}

/// Run ingest, relay and listener for one media stream and wait for all three.
///
/// Whatever the outcome, the call's response queue is finished once the
/// session is over, so the continuation webhook never waits on a queue that
/// nobody will write to again.
pub async fn supervise<M, ME, S, T, TE>(
    state: &GatewayState,
    media: M,
    transcriber_sink: S,
    transcripts: T,
) -> Result<SessionSummary>
where
    M: Stream<Item = std::result::Result<Message, ME>> + Unpin + Send + 'static,
    ME: Display + Send + 'static,
    S: Sink<TranscriberMessage> + Unpin + Send + 'static,
    S::Error: Display + Send,
    T: Stream<Item = std::result::Result<TranscriberMessage, TE>> + Unpin + Send + 'static,
    TE: Display + Send + 'static,
{
    let (call_sid_tx, call_sid_rx) = oneshot::channel();
    let (audio_tx, audio_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let mut ingest = tokio::spawn(run_ingest(media, call_sid_tx, audio_tx, cancel.clone()));
    let mut relay = tokio::spawn(run_relay(audio_rx, transcriber_sink, cancel.clone()));
    let mut listener = tokio::spawn(run_listener(
        call_sid_rx,
        transcripts,
        state.sessions.clone(),
        state.completion.clone(),
        cancel.clone(),
    ));

    let mut group = FailFast::new(cancel.clone());
    let mut summary = SessionSummary::default();
    let mut relay_done = false;
    let mut listener_done = false;

    // Until the telephony side is done
    loop {
        tokio::select! {
            joined = &mut ingest => {
                summary.ingest = group.settle("ingest", joined);
                break;
            }
            joined = &mut relay, if !relay_done => {
                relay_done = true;
                summary.relay = group.settle("relay", joined);
            }
            joined = &mut listener, if !listener_done => {
                listener_done = true;
                summary.listener = group.settle("listener", joined);
            }
        }
    }

    let drain = Duration::from_millis(state.config.transcription().drain_timeout_ms);
    let deadline = tokio::time::sleep(drain);
    tokio::pin!(deadline);

    while !(relay_done && listener_done) {
        tokio::select! {
            joined = &mut relay, if !relay_done => {
                relay_done = true;
                summary.relay = group.settle("relay", joined);
            }
            joined = &mut listener, if !listener_done => {
                listener_done = true;
                summary.listener = group.settle("listener", joined);
            }
            _ = &mut deadline, if !cancel.is_cancelled() => {
                warn!(drain_ms = drain.as_millis() as u64, "Transcription leg did not drain in time, cancelling");
                summary.drain_timed_out = true;
                cancel.cancel();
            }
        }
    }

    let call_sid = group
        .first_error
        .as_ref()
        .and_then(|e| e.call_sid())
        .or_else(|| summary.call_sid())
        .map(str::to_string);
    if let Some(call_sid) = call_sid {
        if let Some(queue) = state.sessions.get(&call_sid).await {
            if queue.finish() {
                debug!(call_sid = %call_sid, "Finished response queue at end of media session");
            }
            reap_after_grace(state.sessions.clone(), call_sid, queue, state.config.session_grace());
        }
    }

    match group.first_error {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}

/// Drop a finished call's queue once a late continuation has had its chance
/// to read the end-marker. The continuation handler usually removes it first.
fn reap_after_grace(
    sessions: Arc<SessionRegistry>,
    call_sid: String,
    queue: ResponseQueue,
    grace: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if sessions.remove_if_current(&call_sid, &queue).await {
            info!(call_sid = %call_sid, "Dropped session queue nobody read to the end");
        }
    });
}

/// Cancels the whole group on the first task failure and keeps that error.
struct FailFast {
    cancel: CancellationToken,
    first_error: Option<RelayError>,
}

impl FailFast {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            first_error: None,
        }
    }

    fn settle<T>(
        &mut self,
        task: &'static str,
        joined: std::result::Result<Result<T>, JoinError>,
    ) -> Option<T> {
        let err = match joined {
            Ok(Ok(value)) => {
                debug!(task, "Media session task finished");
                return Some(value);
            }
            Ok(Err(e)) => e,
            Err(e) => RelayError::Other(anyhow::anyhow!("{task} task failed: {e}")),
        };

        warn!(task, kind = err.kind(), error = %err, "Media session task failed, cancelling the rest");
        self.cancel.cancel();
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
        None
    }
}

/// Media ingest loop.
///
/// Publishes the call identifier from the first `start` frame, forwards
/// decoded audio in receipt order, and always pushes [`AudioChunk::Close`] as
/// the last item on the audio queue, however the loop ends.
pub async fn run_ingest<M, E>(
    mut frames: M,
    call_sid_tx: oneshot::Sender<String>,
    audio_tx: mpsc::UnboundedSender<AudioChunk>,
    cancel: CancellationToken,
) -> Result<IngestStats>
where
    M: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    let mut stats = IngestStats::default();
    let mut call_sid_tx = Some(call_sid_tx);

    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Media ingest cancelled");
            Ok(())
        }
        res = receive_frames(&mut frames, &mut call_sid_tx, &audio_tx, &mut stats) => res,
    };

    if audio_tx.send(AudioChunk::Close).is_err() {
        trace!("Relay already gone, close signal not queued");
    }
    outcome.map(|()| stats)
}

async fn receive_frames<M, E>(
    frames: &mut M,
    call_sid_tx: &mut Option<oneshot::Sender<String>>,
    audio_tx: &mpsc::UnboundedSender<AudioChunk>,
    stats: &mut IngestStats,
) -> Result<()>
where
    M: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = frames.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!("Telephony closed the media stream");
                return Ok(());
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Binary(_)) => {
                warn!("Got unsupported binary frame on media stream");
                continue;
            }
            Err(e) => return Err(RelayError::Stream(format!("Receive failed: {e}"))),
        };

        match MediaFrame::parse(text.as_str()) {
            MediaFrame::Start { start } => {
                let Some(tx) = call_sid_tx.take() else {
                    warn!(call_sid = %start.call_sid, "Ignoring repeated start frame");
                    continue;
                };
                start.media_format.validate(&start.call_sid)?;

                info!(
                    call_sid = %start.call_sid,
                    stream_sid = start.stream_sid.as_deref().unwrap_or("-"),
                    "Media stream started"
                );
                stats.call_sid = Some(start.call_sid.clone());
                if tx.send(start.call_sid).is_err() {
                    debug!("Transcript listener gone before the call identifier was published");
                }
            }
            MediaFrame::Connected => debug!("Media stream handshake"),
            MediaFrame::Media { media } => match media.decode() {
                Ok(audio) => {
                    stats.media_frames += 1;
                    if audio_tx.send(AudioChunk::Audio(audio)).is_err() {
                        trace!("Relay gone, dropping audio");
                    }
                }
                Err(e) => warn!(%e, "Dropping media frame with an invalid payload"),
            },
            MediaFrame::Stop => {
                debug!("Media stream stopped");
                return Ok(());
            }
            MediaFrame::Unsupported => warn!("Got unsupported event on media stream"),
        }
    }

    Ok(())
}
