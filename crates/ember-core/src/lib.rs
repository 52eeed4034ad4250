//! ember-core — shared types and configuration for the ember scaler.
//!
//! Everything here is plain data: the application descriptor (`Meta`), the
//! platform resource handle (`Slot`), the warm execution unit (`Instance`),
//! and the request/reply types of the Assign/Idle surface. The mutable
//! scheduling state (busy flags, idle timestamps) lives in `ember-scaler`,
//! not on these wire-visible values.

pub mod config;
pub mod types;

pub use config::ScalerConfig;
pub use types::{
    AssignReply, AssignRequest, Assignment, IdleReply, IdleRequest, Instance, InvocationResult,
    Meta, Slot, SlotResourceConfig, Stats, Status,
};
