//! Shared marketplace primitives: content identifiers, transactions,
//! records, the event bus and the solver/contract seams, plus in-memory
//! collaborators used to drive simulations.

pub mod contracts;
pub mod crypto;
pub mod error;
pub mod events;
pub mod solver;
pub mod types;

pub use contracts::{Agreement, LedgerContract, PostedResult, SmartContract};
pub use error::MarketError;
pub use events::{event_names, Event, EventBus, EventHandler, EventSource, Subscription};
pub use solver::{ScriptedSolver, Solver};
pub use types::{fields, Cid, Deal, JobResult, Machine, Match, Record, Tx};
