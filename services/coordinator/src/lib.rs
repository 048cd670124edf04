//! # Coordinator - Supervisor Process
//!
//! Runs the N worker processes, owns the per-chain sequence records and
//! relays signals between workers.
//!
//! ## Architecture Role
//!
//! ```text
//!            ┌──────────────── supervisor process ────────────────┐
//! worker 1 ◀─┤ FrameBridge ─▶ SignalRouter ─▶ SequenceAuthority   │
//! worker 2 ◀─┤ FrameBridge ─▶     │  ▲              │             │
//!    ...     │                    │  └── GRANT ─────┘             │
//! worker N ◀─┤ FrameBridge ◀─ SIGNAL fan-out                      │
//!            └────────────────────────────────────────────────────┘
//! ```
//!
//! Workers are child processes of the same binary (`coordinator worker`),
//! talking length-prefixed bincode frames over stdin/stdout.

pub mod authority;
pub mod bridge;
pub mod launcher;
pub mod logging;
pub mod router;
pub mod supervisor;

pub use authority::{
    AuthorityError, AuthorityHandle, ChainBaseSource, SequenceAuthority, SequenceBaseSource,
};
pub use bridge::FrameBridge;
pub use launcher::{LaunchError, ProcessLauncher, WorkerLauncher, WorkerLink};
pub use router::{RouterHandle, RouterStatsSnapshot, SignalRouter};
pub use supervisor::{Supervisor, SupervisorHandle};
