//! Windows tree termination for the dufs supervisor.

mod windows_terminator;

pub use windows_terminator::WindowsTerminator;
