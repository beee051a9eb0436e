//! Client SDK for a Leanplum-style marketing/analytics backend: session
//! lifecycle, event tracking, personalization variables, and configurable
//! request batching over a pluggable transport.

pub mod cache;
pub mod client;
pub mod config;
pub mod constants;
pub mod queue;

pub use client::{Leanplum, Phase};
pub use config::{BatchConfig, Mode, OnFailure};
pub use constants::DEFAULT_API_PATH;
pub use queue::QueueHandle;

// Re-export the transport seam so embedders and tests need only this crate.
pub use leanplum_transport::{
    HttpTransport, MockTransport, RecordedRequest, Transport, TransportError,
};
pub use leanplum_wire::{ActionKind, ActionRecord, RequestBody};
