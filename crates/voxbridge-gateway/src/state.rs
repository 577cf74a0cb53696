//! Gateway shared state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use voxbridge_core::config::Config;
use voxbridge_core::session::SessionRegistry;
use voxbridge_media::Transcriber;
use voxbridge_providers::{CompletionClient, OpenAiCompletionClient};

/// Shared gateway state accessible from every webhook and media-stream handler.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub completion: Arc<dyn CompletionClient>,
    pub transcriber: Transcriber,
    /// Client for the telephony REST API.
    pub http: reqwest::Client,
    media_sessions: AtomicUsize,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, completion: Arc<dyn CompletionClient>) -> Self {
        let transcriber = Transcriber::new(config.transcription());
        Self {
            config,
            sessions: Arc::new(SessionRegistry::new()),
            completion,
            transcriber,
            http: reqwest::Client::new(),
            media_sessions: AtomicUsize::new(0),
        }
    }

    /// Build state with the configured chat-completions client.
    pub fn from_config(config: Config) -> Self {
        let completion = Arc::new(OpenAiCompletionClient::from_config(&config.completion()));
        Self::new(Arc::new(config), completion)
    }

    /// Number of media-stream connections currently being relayed.
    pub fn active_media_sessions(&self) -> usize {
        self.media_sessions.load(Ordering::SeqCst)
    }

    pub(crate) fn media_session_started(&self) -> usize {
        self.media_sessions.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn media_session_ended(&self) -> usize {
        self.media_sessions.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }
}
