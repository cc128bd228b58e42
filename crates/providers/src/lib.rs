//! Pluggable message transport.
//!
//! This crate provides:
//! - `Provider` trait for anything that can transmit a message
//! - `SimulatedProvider`, a transport that logs and reports success
//! - `ProviderRegistry` mapping provider names and message types to instances

pub mod registry;
pub mod simulated;
pub mod traits;

pub use registry::{ProviderRegistry, RegistryError};
pub use simulated::SimulatedProvider;
pub use traits::Provider;
