//! dufs-supervisor core - platform-independent types and abstractions
//!
//! This crate provides the request/error types, the executable resolution
//! table, and the termination trait that are shared across the
//! platform-specific implementations.

mod error;
mod platform;
mod process;
mod request;

pub use error::*;
pub use platform::*;
pub use process::*;
pub use request::*;
