//! Shared building blocks for the servicedesk real-time client.
//!
//! - [`types`]: id and timestamp aliases used across every crate.
//! - [`error`]: the domain-level [`CoreError`](error::CoreError).
//! - [`records`]: notification and conversation message records as the
//!   server serialises them (REST bodies and socket frames alike).
//! - [`backoff`]: the capped exponential [`ReconnectPolicy`](backoff::ReconnectPolicy).
//! - [`timer`]: cancellable one-shot and periodic timers.

pub mod backoff;
pub mod error;
pub mod records;
pub mod timer;
pub mod types;
