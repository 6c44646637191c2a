//! `servicedesk-agent` library crate.
//!
//! Re-exports the configuration and session wiring for integration
//! testing. The binary entrypoint lives in `main.rs`.

pub mod app;
pub mod config;
