//! Lifecycle supervisor for a bundled [dufs](https://github.com/sigoden/dufs)
//! file server.
//!
//! The [`Supervisor`] owns at most one dufs child process: it resolves the
//! bundled binary for the host platform, spawns it with output capture,
//! distinguishes an immediate startup failure from a successful start via a
//! short grace window, terminates the whole process tree on stop, and
//! notifies a registered callback when the server exits on its own.

mod probe;
mod supervisor;

pub use dufs_supervisor_core::*;
pub use probe::port_available;
pub use supervisor::Supervisor;
