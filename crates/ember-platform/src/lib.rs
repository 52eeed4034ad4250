//! ember-platform — the outbound platform collaborator.
//!
//! The scaler's only external dependency: the platform that actually
//! reserves resource slots and boots instances inside them. The capability
//! set is small (`create_slot`, `init`, `destroy_slot`) and modeled as a
//! trait so tests can substitute a fake.

pub mod client;
pub mod error;

pub use client::{HttpPlatformClient, PlatformClient};
pub use error::{PlatformError, PlatformResult};
