//! Telephony webhooks: call start and call continuation.

use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{Form, Path, State};
use axum::http::HeaderMap;
use axum::http::header::HOST;
use serde::Deserialize;
use tracing::{error, info, warn};

use voxbridge_core::protocol::ResponseMessage;

use crate::state::GatewayState;
use crate::twiml::{INBOUND_TRACK, VoiceResponse};

/// The fields of a voice webhook body this service reads.
#[derive(Debug, Default, Deserialize)]
pub struct CallWebhook {
    #[serde(rename = "CallSid", default)]
    pub call_sid: Option<String>,
}

fn call_sid_from(form: Result<Form<CallWebhook>, FormRejection>) -> Option<String> {
    match form {
        Ok(Form(body)) => body.call_sid.filter(|sid| !sid.is_empty()),
        Err(rejection) => {
            warn!(%rejection, "Unreadable webhook body");
            None
        }
    }
}

/// Path of the continuation webhook for `call_sid`.
pub fn continue_path(call_sid: &str) -> String {
    format!("/twiml/continue/{call_sid}")
}

/// Media-stream URL the telephony platform should connect back to.
///
/// Uses the configured public host when set, otherwise the request's `Host`.
pub fn stream_url(state: &GatewayState, headers: &HeaderMap) -> String {
    let host = state
        .config
        .public_host()
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("localhost:{}", state.config.gateway_port()));
    format!("wss://{host}/stream")
}

/// `POST /twiml/start`: first webhook of an inbound call.
pub async fn start_call(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    form: Result<Form<CallWebhook>, FormRejection>,
) -> VoiceResponse {
    let prompts = state.config.prompts();

    let Some(call_sid) = call_sid_from(form) else {
        error!("Start webhook without a CallSid, not creating a session");
        return VoiceResponse::new().say(prompts.start_failure);
    };

    state.sessions.create(&call_sid).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_call_started();

    let stream_url = stream_url(&state, &headers);
    info!(call_sid = %call_sid, stream_url = %stream_url, "Call started");

    VoiceResponse::new()
        .start_stream(stream_url, INBOUND_TRACK)
        .say(prompts.welcome)
        .redirect(continue_path(&call_sid))
}

/// `POST /twiml/continue/{call_id}`: speak the next queued response.
///
/// Suspends until the call's transcript listener produces something.
pub async fn continue_call(
    State(state): State<Arc<GatewayState>>,
    Path(call_id): Path<String>,
    form: Result<Form<CallWebhook>, FormRejection>,
) -> VoiceResponse {
    let prompts = state.config.prompts();

    let Some(queue) = state.sessions.get(&call_id).await else {
        error!(call_sid = %call_id, "Continuation for a call that was never started");
        return VoiceResponse::new().say(prompts.failure);
    };

    match queue.next().await {
        ResponseMessage::End => {
            state.sessions.remove(&call_id).await;
            info!(call_sid = %call_id, "Call finished");
            VoiceResponse::new().say(prompts.goodbye)
        }
        ResponseMessage::Speak(text) => {
            #[cfg(feature = "metrics")]
            crate::metrics::record_response_delivered();

            let response = VoiceResponse::new().say(text);
            match call_sid_from(form) {
                Some(call_sid) => response.redirect(continue_path(&call_sid)),
                None => {
                    warn!(call_sid = %call_id, "Continuation body has no CallSid, cannot redirect");
                    response.say(prompts.failure)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
    use tower::ServiceExt;

    use voxbridge_core::config::{Config, GatewayConfig};
    use voxbridge_providers::CompletionClient;

    use super::*;
    use crate::server::build_router;

    struct NoCompletion;

    #[async_trait]
    impl CompletionClient for NoCompletion {
        fn id(&self) -> &str {
            "none"
        }

        async fn complete(&self, _prompt: &str) -> String {
            String::new()
        }
    }

    fn test_state(config: Config) -> Arc<GatewayState> {
        Arc::new(GatewayState::new(Arc::new(config), Arc::new(NoCompletion)))
    }

    fn form_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(HOST, "relay.example.com")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_start_creates_session_and_renders_stream() {
        let state = test_state(Config::default());
        let app = build_router(state.clone());

        let response = app
            .oneshot(form_post("/twiml/start", "CallSid=CA1&From=%2B15550001111"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html");
        let xml = body_text(response).await;
        assert!(xml.contains(r#"<Stream track="inbound_track" url="wss://relay.example.com/stream" />"#));
        assert!(xml.contains("<Say>Welcome to Chat D G. What would you like to know?</Say>"));
        assert!(xml.contains(r#"<Redirect method="POST">/twiml/continue/CA1</Redirect>"#));
        assert!(state.sessions.get("CA1").await.is_some());
    }

    #[tokio::test]
    async fn test_start_uses_public_host() {
        let config = Config {
            gateway: Some(GatewayConfig {
                public_host: Some("voice.example.org".into()),
                ..GatewayConfig::default()
            }),
            ..Config::default()
        };
        let app = build_router(test_state(config));

        let response = app
            .oneshot(form_post("/twiml/start", "CallSid=CA1"))
            .await
            .unwrap();
        let xml = body_text(response).await;
        assert!(xml.contains(r#"url="wss://voice.example.org/stream""#));
    }

    #[tokio::test]
    async fn test_start_without_call_sid_creates_nothing() {
        let state = test_state(Config::default());
        let app = build_router(state.clone());

        let response = app
            .oneshot(form_post("/twiml/start", "From=%2B15550001111"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let xml = body_text(response).await;
        assert!(xml.contains("<Say>Something went wrong! Please try again later.</Say>"));
        assert!(!xml.contains("<Redirect"));
        assert!(!xml.contains("<Stream"));
        assert!(state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_continue_speaks_text_and_redirects() {
        let state = test_state(Config::default());
        let queue = state.sessions.create("CA1").await;
        queue.push("It's sunny.");

        let response = build_router(state)
            .oneshot(form_post("/twiml/continue/CA1", "CallSid=CA1"))
            .await
            .unwrap();
        let xml = body_text(response).await;
        assert!(xml.contains("<Say>It&apos;s sunny.</Say>"));
        assert!(xml.contains(r#"<Redirect method="POST">/twiml/continue/CA1</Redirect>"#));
    }

    #[tokio::test]
    async fn test_continue_redirect_uses_body_call_sid() {
        let state = test_state(Config::default());
        state.sessions.create("CA1").await.push("hello");

        let response = build_router(state)
            .oneshot(form_post("/twiml/continue/CA1", "CallSid=CA2"))
            .await
            .unwrap();
        let xml = body_text(response).await;
        assert!(xml.contains("/twiml/continue/CA2"));
    }

    #[tokio::test]
    async fn test_continue_without_body_call_sid_says_failure() {
        let state = test_state(Config::default());
        state.sessions.create("CA1").await.push("hello");

        let response = build_router(state)
            .oneshot(form_post("/twiml/continue/CA1", ""))
            .await
            .unwrap();
        let xml = body_text(response).await;
        assert!(xml.contains("<Say>hello</Say>"));
        assert!(xml.contains("<Say>Something went wrong. Please try again later.</Say>"));
        assert!(!xml.contains("<Redirect"));
    }

    #[tokio::test]
    async fn test_continue_end_marker_says_goodbye_and_removes_session() {
        let state = test_state(Config::default());
        state.sessions.create("CA1").await.finish();

        let response = build_router(state.clone())
            .oneshot(form_post("/twiml/continue/CA1", "CallSid=CA1"))
            .await
            .unwrap();
        let xml = body_text(response).await;
        assert!(xml.contains("<Say>Thank you for calling. Goodbye!</Say>"));
        assert!(!xml.contains("<Redirect"));
        assert!(state.sessions.get("CA1").await.is_none());
    }

    #[tokio::test]
    async fn test_continue_unknown_call_is_failure() {
        let state = test_state(Config::default());

        let response = build_router(state)
            .oneshot(form_post("/twiml/continue/CA404", "CallSid=CA404"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let xml = body_text(response).await;
        assert!(xml.contains("Something went wrong"));
        assert!(!xml.contains("<Redirect"));
    }

    #[tokio::test]
    async fn test_continue_waits_for_response() {
        let state = test_state(Config::default());
        let queue = state.sessions.create("CA1").await;
        let app = build_router(state);

        let pending = tokio::spawn(app.oneshot(form_post("/twiml/continue/CA1", "CallSid=CA1")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        queue.push("late answer");
        let response = pending.await.unwrap().unwrap();
        assert!(body_text(response).await.contains("<Say>late answer</Say>"));
    }

    #[test]
    fn test_stream_url_falls_back_to_port() {
        let state = test_state(Config::default());
        assert_eq!(
            stream_url(&state, &HeaderMap::new()),
            "wss://localhost:8080/stream"
        );
    }
}
