//! Voice response documents returned to the telephony webhooks.
//!
//! Only three directives are needed: speak a line, redirect to another
//! webhook with POST, and start a media stream back to this service.

use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};

/// Track name requested when starting a media stream.
pub const INBOUND_TRACK: &str = "inbound_track";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verb {
    Say(String),
    Redirect { url: String },
    StartStream { url: String, track: String },
}

/// Builder for a voice response document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say(text.into()));
        self
    }

    /// Redirect to `url` with method POST.
    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Redirect { url: url.into() });
        self
    }

    pub fn start_stream(mut self, url: impl Into<String>, track: impl Into<String>) -> Self {
        self.verbs.push(Verb::StartStream {
            url: url.into(),
            track: track.into(),
        });
        self
    }

    /// Whether the document hands control back to us after it plays.
    pub fn has_redirect(&self) -> bool {
        self.verbs.iter().any(|v| matches!(v, Verb::Redirect { .. }))
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for verb in &self.verbs {
            match verb {
                Verb::Say(text) => {
                    xml.push_str("<Say>");
                    xml.push_str(&escape(text));
                    xml.push_str("</Say>");
                }
                Verb::Redirect { url } => {
                    xml.push_str(r#"<Redirect method="POST">"#);
                    xml.push_str(&escape(url));
                    xml.push_str("</Redirect>");
                }
                Verb::StartStream { url, track } => {
                    xml.push_str(&format!(
                        r#"<Start><Stream track="{}" url="{}" /></Start>"#,
                        escape(track),
                        escape(url)
                    ));
                }
            }
        }
        xml.push_str("</Response>");
        xml
    }
}

impl IntoResponse for VoiceResponse {
    fn into_response(self) -> Response {
        ([(CONTENT_TYPE, "text/html")], self.to_xml()).into_response()
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
