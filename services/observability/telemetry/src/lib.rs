//! # Telemetry
//!
//! Fire-and-forget event recording for supervisor and worker lifecycle and
//! for every strike outcome. Recording is synchronous and never fails; a
//! sink that cannot deliver drops the event.
//!
//! ## Sinks
//!
//! - [`TracingSink`]: structured `tracing` events (production default)
//! - [`MemorySink`]: in-memory capture for tests
//! - [`FanoutSink`]: forwards to several sinks

pub mod emoji;
pub mod event;
pub mod sink;

pub use emoji::LogEmoji;
pub use event::{AbortReason, DispatchOutcome, TelemetryEvent};
pub use sink::{FanoutSink, MemorySink, TelemetrySink, TracingSink};
