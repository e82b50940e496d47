//! Shared error plumbing and the in-process event bus used across all
//! tandem crates.

pub mod bus;
pub mod error;

pub use {bus::EventBus, error::FromMessage};
