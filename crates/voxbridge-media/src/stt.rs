//! Streaming speech-to-text connection.

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request, header::AUTHORIZATION};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use voxbridge_core::config::TranscriptionConfig;
use voxbridge_core::error::{RelayError, Result};

/// An open transcriber WebSocket.
pub type TranscriberStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one transcriber connection per media stream.
#[derive(Debug, Clone)]
pub struct Transcriber {
    config: TranscriptionConfig,
}

impl Transcriber {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranscriptionConfig {
        &self.config
    }

    /// Build the upgrade request: listen URL with audio parameters and the
    /// `Token` authorization header when a key is configured.
    pub fn build_request(&self) -> Result<Request<()>> {
        let url = self.config.listen_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::Transcriber(format!("Invalid transcriber URL {url}: {e}")))?;

        if let Some(api_key) = self.config.resolve_api_key() {
            let value = HeaderValue::from_str(&format!("Token {api_key}"))
                .map_err(|e| RelayError::Transcriber(format!("Invalid API key header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        Ok(request)
    }

    pub async fn connect(&self) -> Result<TranscriberStream> {
        let request = self.build_request()?;
        debug!(uri = %request.uri(), "Connecting to transcriber");

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| RelayError::Transcriber(format!("Connect failed: {e}")))?;

        info!(status = %response.status(), "Opened connection to transcriber");
        Ok(stream)
    }
}
