//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Voxbridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephony: Option<TelephonyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Host advertised to the telephony platform for the media stream.
    /// Falls back to the `Host` header of the start webhook.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_host: Option<String>,

    /// How long a finished call's queue stays registered for a late
    /// continuation webhook before it is dropped.
    #[serde(default = "default_session_grace_ms")]
    pub session_grace_ms: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_session_grace_ms() -> u64 {
    60_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            public_host: None,
            session_grace_ms: default_session_grace_ms(),
        }
    }
}

/// Telephony REST API credentials (number search).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,

    #[serde(default = "default_account_sid_env")]
    pub account_sid_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: Option<String>,

    #[serde(default = "default_telephony_api_url")]
    pub api_base_url: String,
}

fn default_account_sid_env() -> Option<String> {
    Some("TWILIO_ACCOUNT_SID".into())
}

fn default_auth_token_env() -> Option<String> {
    Some("TWILIO_AUTH_TOKEN".into())
}

fn default_telephony_api_url() -> String {
    "https://api.twilio.com".into()
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            account_sid_env: default_account_sid_env(),
            auth_token: None,
            auth_token_env: default_auth_token_env(),
            api_base_url: default_telephony_api_url(),
        }
    }
}

impl TelephonyConfig {
    pub fn resolve_account_sid(&self) -> Option<String> {
        resolve_secret_field(&self.account_sid, &self.account_sid_env)
    }

    pub fn resolve_auth_token(&self) -> Option<String> {
        resolve_secret_field(&self.auth_token, &self.auth_token_env)
    }
}

/// Streaming speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// WebSocket endpoint of the streaming transcriber.
    #[serde(default = "default_transcription_url")]
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_transcription_key_env")]
    pub api_key_env: Option<String>,

    /// Audio encoding announced to the transcriber.
    #[serde(default = "default_encoding")]
    pub encoding: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Milliseconds of silence that end an utterance.
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u64,

    /// How long the transcription leg may keep running after the telephony
    /// stream has stopped before it is cancelled.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_transcription_url() -> String {
    "wss://api.deepgram.com/v1/listen".into()
}

fn default_transcription_key_env() -> Option<String> {
    Some("CONSOLE_API_KEY".into())
}

fn default_encoding() -> String {
    "mulaw".into()
}

fn default_sample_rate() -> u32 {
    8000
}

fn default_endpointing_ms() -> u64 {
    1000
}

fn default_drain_timeout_ms() -> u64 {
    10_000
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            url: default_transcription_url(),
            api_key: None,
            api_key_env: default_transcription_key_env(),
            encoding: default_encoding(),
            sample_rate: default_sample_rate(),
            endpointing_ms: default_endpointing_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    /// Full listen URL including the audio and endpointing query parameters.
    pub fn listen_url(&self) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{sep}encoding={}&sample_rate={}&endpointing={}",
            self.url, self.encoding, self.sample_rate, self.endpointing_ms
        )
    }
}

/// Chat-completions API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_url")]
    pub base_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_completion_key_env")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,
}

fn default_completion_url() -> String {
    "https://api.openai.com".into()
}

fn default_completion_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".into())
}

fn default_model() -> String {
    "gpt-3.5-turbo".into()
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_url(),
            api_key: None,
            api_key_env: default_completion_key_env(),
            model: default_model(),
        }
    }
}

impl CompletionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Lines spoken to the caller by the webhook handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default = "default_welcome")]
    pub welcome: String,

    #[serde(default = "default_goodbye")]
    pub goodbye: String,

    /// Said on a continuation that cannot be served.
    #[serde(default = "default_failure")]
    pub failure: String,

    /// Said when the start webhook carries no call identifier.
    #[serde(default = "default_start_failure")]
    pub start_failure: String,
}

fn default_welcome() -> String {
    "Welcome to Chat D G. What would you like to know?".into()
}

fn default_goodbye() -> String {
    "Thank you for calling. Goodbye!".into()
}

fn default_failure() -> String {
    "Something went wrong. Please try again later.".into()
}

fn default_start_failure() -> String {
    "Something went wrong! Please try again later.".into()
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            welcome: default_welcome(),
            goodbye: default_goodbye(),
            failure: default_failure(),
            start_failure: default_start_failure(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voxbridge_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn public_host(&self) -> Option<&str> {
        self.gateway.as_ref().and_then(|g| g.public_host.as_deref())
    }

    pub fn session_grace(&self) -> std::time::Duration {
        let ms = self
            .gateway
            .as_ref()
            .map_or_else(default_session_grace_ms, |g| g.session_grace_ms);
        std::time::Duration::from_millis(ms)
    }

    pub fn telephony(&self) -> TelephonyConfig {
        self.telephony.clone().unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn completion(&self) -> CompletionConfig {
        self.completion.clone().unwrap_or_default()
    }

    pub fn prompts(&self) -> PromptsConfig {
        self.prompts.clone().unwrap_or_default()
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.completion().resolve_api_key().is_none() {
            warnings.push("Completion API has no API key configured".to_string());
        }

        let transcription = self.transcription();
        if transcription.resolve_api_key().is_none() {
            warnings.push("Transcription service has no API key configured".to_string());
        }
        if !(transcription.url.starts_with("wss://") || transcription.url.starts_with("ws://")) {
            errors.push(format!(
                "Transcription URL must be a ws:// or wss:// URL: {}",
                transcription.url
            ));
        }
        if transcription.encoding != "mulaw" || transcription.sample_rate != 8000 {
            errors.push(format!(
                "Transcription audio must be mulaw @ 8000 Hz to match the media stream, got {} @ {}",
                transcription.encoding, transcription.sample_rate
            ));
        }

        let telephony = self.telephony();
        if telephony.resolve_account_sid().is_none() || telephony.resolve_auth_token().is_none() {
            warnings.push("Telephony credentials missing; number search is disabled".to_string());
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Voxbridge data: `~/.voxbridge/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxbridge")
}
