//! # Coordinator Bus Protocol
//!
//! Shared vocabulary between the supervising process and its worker processes.
//!
//! ## Contents
//!
//! - **Identifiers**: [`ChainId`], [`WorkerId`], [`CorrelationId`]
//! - **Network descriptors**: immutable per-chain configuration ([`NetworkDescriptor`])
//! - **Bus messages**: the closed [`BusMessage`] enum exchanged over the signal bus
//! - **Framing**: length-prefixed bincode frames over any async byte stream
//!
//! ## Architecture Role
//!
//! ```text
//! Worker ──RESERVE/SIGNAL/RESYNC──▶ [stdout frames] ──▶ Supervisor
//! Worker ◀──GRANT/REJECT/SIGNAL─── [stdin frames]  ◀── Supervisor
//! ```
//!
//! Every frame is `u32` little-endian length followed by the bincode payload.

pub mod frame;
pub mod ids;
pub mod message;
pub mod network;

pub use frame::{encode_frame, read_frame, write_frame, FrameError, MAX_FRAME_LEN};
pub use ids::{ChainId, CorrelationId, WorkerId};
pub use message::{BusMessage, RejectReason, SignalHint};
pub use network::{DispatchKind, NetworkDescriptor, Roles};
