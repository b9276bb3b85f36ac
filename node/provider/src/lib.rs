//! Resource provider participant of the compute marketplace simulation.
//!
//! The provider reacts to two event streams and one clock:
//!
//! ```text
//!   Solver ──match──▶ ResourceProvider ──agree_to_match(tx)──▶ SmartContract
//!                            ▲                                      │
//!                            └────────────────deal──────────────────┘
//!   clock ──tick──▶ update_job_running_times ──post_result(tx)──▶ SmartContract
//! ```
//!
//! All of it is synchronous and single threaded: each handler and each tick
//! runs to completion before the next one starts.

pub mod config;
pub mod inventory;
pub mod provider;

pub use config::{ProviderConfig, ResultPosting};
pub use inventory::MachineInventory;
pub use provider::{DealPhase, ResourceProvider, ServiceProvider};
