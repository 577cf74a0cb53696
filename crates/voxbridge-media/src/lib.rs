//! Transcription leg of a call: the streaming STT connection, the relay that
//! feeds it audio, and the listener that turns its transcripts into responses.

pub mod listener;
pub mod relay;
pub mod stt;

pub use listener::{ListenerStats, run_listener};
pub use relay::{RelayStats, run_relay};
pub use stt::{Transcriber, TranscriberStream};
