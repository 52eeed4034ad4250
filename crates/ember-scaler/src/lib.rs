//! ember-scaler — the per-application instance scaler.
//!
//! For each application the scaler maintains a warm pool of execution
//! instances and serves two operations: `assign` (get an instance for a
//! pending invocation) and `idle` (return it afterwards). It balances
//! latency (reuse a warm instance) against cost (reclaim instances idle
//! past a TTL).
//!
//! - `Scaler` — the single-app control plane: idle pool, FIFO waiter
//!   queue, bounded concurrent creation, background GC
//! - `RuntimeStatus` — EWMA service-time estimator + in-flight window
//! - `ScalerManager` — app key → scaler registry
//!
//! State is fully in-memory; a process restart loses the warm pools.

pub mod error;
pub mod manager;
pub mod scaler;
pub mod status;

pub use error::{ScalerError, ScalerResult};
pub use manager::ScalerManager;
pub use scaler::Scaler;
pub use status::{RuntimeSnapshot, RuntimeStatus};
