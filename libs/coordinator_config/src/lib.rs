//! # Coordinator Configuration
//!
//! Runtime parameters for the supervisor and its workers. Everything is
//! loaded once at startup, optionally overridden from the environment,
//! validated, and then treated as immutable.
//!
//! ## Loading Order
//!
//! ```text
//! Defaults → TOML file (--config or COORDINATOR_CONFIG) → Environment → validate()
//! ```
//!
//! Secrets never live in the file: the signing key comes from
//! `TREASURY_PRIVATE_KEY` via [`Credentials::from_env`].

pub mod assignment;
pub mod credentials;
pub mod error;
pub mod settings;

pub use assignment::{assign, WorkerAssignment};
pub use credentials::Credentials;
pub use error::ConfigError;
pub use settings::{
    default_networks, CoordinatorConfig, DetectorSettings, StrikeSettings, SupervisorSettings,
    CONFIG_PATH_ENV,
};
