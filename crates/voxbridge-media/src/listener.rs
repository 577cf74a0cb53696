//! Transcript listener: turns transcriber results into spoken responses.
//!
//! The listener is bound to a call only once the media ingest loop has seen
//! the `start` frame and published the call identifier through a oneshot
//! rendezvous. Nothing is dispatched before that point.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use voxbridge_core::error::{RelayError, Result};
use voxbridge_core::protocol::TranscriptEvent;
use voxbridge_core::session::{ResponseQueue, SessionRegistry};
use voxbridge_providers::CompletionClient;

/// Counters reported when the listener finishes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListenerStats {
    pub call_sid: Option<String>,
    /// Non-empty transcripts sent to the completion service.
    pub completions: usize,
    pub skipped_empty: usize,
}

/// Run the listener for one media stream.
///
/// Once bound to a call, the call's queue is always finished on the way out
/// (normal close, transcriber error, or cancellation) so the telephony leg is
/// never left waiting on a queue nobody will write to again.
pub async fn run_listener<R, E>(
    call_sid_rx: oneshot::Receiver<String>,
    mut frames: R,
    sessions: Arc<SessionRegistry>,
    completion: Arc<dyn CompletionClient>,
    cancel: CancellationToken,
) -> Result<ListenerStats>
where
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut stats = ListenerStats::default();

    let call_sid = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Transcript listener cancelled before call identifier arrived");
            return Ok(stats);
        }
        sid = call_sid_rx => match sid {
            Ok(sid) => sid,
            Err(_) => {
                debug!("Media stream ended before call identifier was published");
                return Ok(stats);
            }
        },
    };

    info!(call_sid = %call_sid, "Transcript listener bound to call");
    stats.call_sid = Some(call_sid.clone());

    let queue = sessions
        .get(&call_sid)
        .await
        .ok_or_else(|| RelayError::SessionNotFound(call_sid.clone()))?;

    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(call_sid = %call_sid, "Transcript listener cancelled");
            Ok(())
        }
        res = dispatch_transcripts(&mut frames, &queue, completion.as_ref(), &mut stats) => res,
    };

    queue.finish();
    info!(
        call_sid = %call_sid,
        completions = stats.completions,
        "Transcript listener finished"
    );
    outcome.map(|()| stats)
}

async fn dispatch_transcripts<R, E>(
    frames: &mut R,
    queue: &ResponseQueue,
    completion: &dyn CompletionClient,
    stats: &mut ListenerStats,
) -> Result<()>
where
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => match TranscriptEvent::parse(&text) {
                TranscriptEvent::StreamEnd { request_id } => {
                    debug!(%request_id, "Transcriber signalled end of stream");
                    queue.finish();
                }
                TranscriptEvent::Transcript { text, .. } if text.is_empty() => {
                    stats.skipped_empty += 1;
                    trace!("Skipping empty transcript");
                }
                TranscriptEvent::Transcript { text, is_final } => {
                    if queue.is_finished() {
                        debug!(transcript = %text, "Transcript after end of stream, ignoring");
                        continue;
                    }
                    debug!(transcript = %text, is_final, "Dispatching transcript");
                    stats.completions += 1;
                    let reply = completion.complete(&text).await;
                    queue.push(reply);
                }
                TranscriptEvent::Unsupported => {
                    warn!("Got unsupported message from transcriber");
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(?frame, "Transcriber closed the connection");
                queue.finish();
                return Ok(());
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(other) => {
                warn!(len = other.len(), "Got unsupported frame type from transcriber");
            }
            Err(e) => {
                return Err(RelayError::Transcriber(format!("Receive failed: {e}")));
            }
        }
    }

    // Stream ended without a close frame
    queue.finish();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_tungstenite::tungstenite;
    use voxbridge_core::protocol::ResponseMessage;

    use super::*;

    struct RecordingCompletion {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingCompletion {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for RecordingCompletion {
        fn id(&self) -> &str {
            "recording"
        }

        async fn complete(&self, prompt: &str) -> String {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn text(json: &str) -> std::result::Result<Message, tungstenite::Error> {
        Ok(Message::Text(json.to_string().into()))
    }

    fn transcript(words: &str) -> std::result::Result<Message, tungstenite::Error> {
        text(&format!(
            r#"{{"type":"Results","is_final":true,"channel":{{"alternatives":[{{"transcript":"{words}"}}]}}}}"#
        ))
    }

    fn stream_end() -> std::result::Result<Message, tungstenite::Error> {
        text(r#"{"type":"Metadata","request_id":"req-1"}"#)
    }

    async fn bound_registry(call_sid: &str) -> (Arc<SessionRegistry>, ResponseQueue) {
        let sessions = Arc::new(SessionRegistry::new());
        let queue = sessions.create(call_sid).await;
        (sessions, queue)
    }

    async fn next_now(queue: &ResponseQueue) -> ResponseMessage {
        tokio::time::timeout(Duration::from_millis(200), queue.next())
            .await
            .expect("queue should have an item")
    }

    #[tokio::test]
    async fn test_transcript_dispatch_then_end() {
        let (sessions, queue) = bound_registry("CA1").await;
        let completion = RecordingCompletion::new("It's sunny.");
        let (sid_tx, sid_rx) = oneshot::channel();
        sid_tx.send("CA1".to_string()).unwrap();

        let frames = futures::stream::iter(vec![
            transcript("what's the weather"),
            stream_end(),
            Ok(Message::Close(None)),
        ]);

        let stats = run_listener(sid_rx, frames, sessions, completion.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.call_sid.as_deref(), Some("CA1"));
        assert_eq!(stats.completions, 1);
        assert_eq!(completion.prompts(), vec!["what's the weather".to_string()]);
        assert_eq!(next_now(&queue).await, ResponseMessage::Speak("It's sunny.".into()));
        assert_eq!(next_now(&queue).await, ResponseMessage::End);
        // Close after the stream-end marker must not add a second end-marker
        assert!(tokio::time::timeout(Duration::from_millis(20), queue.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_end_makes_no_completion_request() {
        let (sessions, queue) = bound_registry("CA1").await;
        let completion = RecordingCompletion::new("unused");
        let (sid_tx, sid_rx) = oneshot::channel();
        sid_tx.send("CA1".to_string()).unwrap();

        let frames = futures::stream::iter(vec![stream_end()]);
        run_listener(sid_rx, frames, sessions, completion.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert!(completion.prompts().is_empty());
        assert_eq!(next_now(&queue).await, ResponseMessage::End);
        assert!(tokio::time::timeout(Duration::from_millis(20), queue.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_transcript_is_skipped() {
        let (sessions, queue) = bound_registry("CA1").await;
        let completion = RecordingCompletion::new("reply");
        let (sid_tx, sid_rx) = oneshot::channel();
        sid_tx.send("CA1".to_string()).unwrap();

        let frames = futures::stream::iter(vec![transcript(""), transcript(""), Ok(Message::Close(None))]);
        let stats = run_listener(sid_rx, frames, sessions, completion.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.skipped_empty, 2);
        assert!(completion.prompts().is_empty());
        assert_eq!(next_now(&queue).await, ResponseMessage::End);
    }

    #[tokio::test]
    async fn test_empty_completion_is_still_enqueued() {
        let (sessions, queue) = bound_registry("CA1").await;
        let completion = RecordingCompletion::new("");
        let (sid_tx, sid_rx) = oneshot::channel();
        sid_tx.send("CA1".to_string()).unwrap();

        let frames = futures::stream::iter(vec![transcript("hello")]);
        run_listener(sid_rx, frames, sessions, completion, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(next_now(&queue).await, ResponseMessage::Speak(String::new()));
        assert_eq!(next_now(&queue).await, ResponseMessage::End);
    }

    #[tokio::test]
    async fn test_unsupported_frames_are_skipped() {
        let (sessions, queue) = bound_registry("CA1").await;
        let completion = RecordingCompletion::new("ok");
        let (sid_tx, sid_rx) = oneshot::channel();
        sid_tx.send("CA1".to_string()).unwrap();

        let frames = futures::stream::iter(vec![
            text(r#"{"type":"SpeechStarted"}"#),
            Ok(Message::Binary(vec![0, 1].into())),
            text("garbage"),
            transcript("still here"),
            Ok(Message::Close(None)),
        ]);
        let stats = run_listener(sid_rx, frames, sessions, completion, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.completions, 1);
        assert_eq!(next_now(&queue).await, ResponseMessage::Speak("ok".into()));
        assert_eq!(next_now(&queue).await, ResponseMessage::End);
    }

    #[tokio::test]
    async fn test_frames_after_close_are_not_read() {
        let (sessions, _queue) = bound_registry("CA1").await;
        let completion = RecordingCompletion::new("ok");
        let (sid_tx, sid_rx) = oneshot::channel();
        sid_tx.send("CA1".to_string()).unwrap();

        let frames = futures::stream::iter(vec![Ok(Message::Close(None)), transcript("too late")]);
        run_listener(sid_rx, frames, sessions, completion.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert!(completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_no_dispatch_before_rendezvous() {
        let (sessions, queue) = bound_registry("CA1").await;
        let completion = RecordingCompletion::new("It's sunny.");
        let (sid_tx, sid_rx) = oneshot::channel();

        // Transcripts are already waiting on the connection
        let frames = futures::stream::iter(vec![transcript("what's the weather")]);
        let listener = tokio::spawn(run_listener(
            sid_rx,
            frames,
            sessions,
            completion.clone(),
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(completion.prompts().is_empty());

        sid_tx.send("CA1".to_string()).unwrap();
        listener.await.unwrap().unwrap();

        assert_eq!(completion.prompts().len(), 1);
        assert_eq!(next_now(&queue).await, ResponseMessage::Speak("It's sunny.".into()));
    }

    #[tokio::test]
    async fn test_missing_session_is_error() {
        let sessions = Arc::new(SessionRegistry::new());
        let (sid_tx, sid_rx) = oneshot::channel();
        sid_tx.send("CA404".to_string()).unwrap();

        let frames = futures::stream::iter(vec![transcript("hello")]);
        let result = run_listener(
            sid_rx,
            frames,
            sessions,
            RecordingCompletion::new("x"),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(RelayError::SessionNotFound(sid)) if sid == "CA404"));
    }

    #[tokio::test]
    async fn test_rendezvous_sender_dropped_exits_quietly() {
        let sessions = Arc::new(SessionRegistry::new());
        let (sid_tx, sid_rx) = oneshot::channel::<String>();
        drop(sid_tx);

        let frames = futures::stream::iter(Vec::<std::result::Result<Message, tungstenite::Error>>::new());
        let stats = run_listener(
            sid_rx,
            frames,
            sessions,
            RecordingCompletion::new("x"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(stats.call_sid.is_none());
    }

    #[tokio::test]
    async fn test_cancel_finishes_queue() {
        let (sessions, queue) = bound_registry("CA1").await;
        let (sid_tx, sid_rx) = oneshot::channel();
        sid_tx.send("CA1".to_string()).unwrap();
        let cancel = CancellationToken::new();

        // A transcriber that never sends anything
        let frames = futures::stream::pending::<std::result::Result<Message, tungstenite::Error>>();
        let listener = tokio::spawn(run_listener(
            sid_rx,
            frames,
            sessions,
            RecordingCompletion::new("x"),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        listener.await.unwrap().unwrap();

        assert_eq!(next_now(&queue).await, ResponseMessage::End);
    }

    #[tokio::test]
    async fn test_receive_error_finishes_queue() {
        let (sessions, queue) = bound_registry("CA1").await;
        let (sid_tx, sid_rx) = oneshot::channel();
        sid_tx.send("CA1".to_string()).unwrap();

        let frames = futures::stream::iter(vec![Err(tungstenite::Error::ConnectionClosed)]);
        let result = run_listener(
            sid_rx,
            frames,
            sessions,
            RecordingCompletion::new("x"),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(RelayError::Transcriber(_))));
        assert_eq!(next_now(&queue).await, ResponseMessage::End);
    }
}
