//! Declarative snapshots and their reconciliation onto a provider
//!
//! [`snapshot`] holds the immutable desired state, [`plan`] the pure diff
//! between two snapshots and [`engine`] the stateful executor that applies a
//! plan through a `ProviderAdapter` and remembers what actually landed.

pub mod engine;
pub mod plan;
pub mod snapshot;
