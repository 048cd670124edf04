//! # Strike Strategy - Worker Runtime
//!
//! Everything a single worker process runs: the opportunity detector over a
//! live event feed, the execution gate, the simulate-then-commit strike
//! pipeline and the worker end of the signal bus.
//!
//! ## Architecture Role
//!
//! ```text
//! EventSource ─▶ OpportunityDetector ─▶ SIGNAL ─▶ (supervisor fan-out)
//!                                                     │
//! SIGNAL ─▶ ExecutionGate ─▶ StrikePipeline ──────────┘
//!                               │ simulate → cost → margin → RESERVE → sign → dispatch
//!                               ▼
//!                          ChainClient (ethers-rs)
//! ```
//!
//! Chain access is behind [`ChainClient`] so the pipeline can be exercised
//! against in-memory clients.

pub mod bus_client;
pub mod chain;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod ethers_client;
pub mod events;
pub mod gate;
pub mod pipeline;
pub mod price;
pub mod worker;

#[cfg(test)]
mod testing;

pub use bus_client::{BusClient, ReserveError, SequenceReserver};
pub use chain::{
    ActionRequest, CandidateAction, ChainClient, FeeSnapshot, SignedAction, Simulation,
    SubmissionAck,
};
pub use detector::OpportunityDetector;
pub use dispatch::Dispatcher;
pub use error::ChainError;
pub use ethers_client::EthersChainClient;
pub use events::{run_event_feed, ChainEvent, EventSource, WsEventSource};
pub use gate::{ExecutionGate, GateRejection, GateState, GateStats, StrikePermit};
pub use pipeline::{PipelineContext, StrikePipeline, StrikeReport};
pub use price::{spawn_price_heartbeat, PriceCache};
pub use worker::{WorkerError, WorkerRuntime};
