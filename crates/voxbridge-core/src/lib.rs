//! Core types, config, errors, and the call session registry for Voxbridge.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
