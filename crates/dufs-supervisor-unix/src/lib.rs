//! Unix tree termination for the dufs supervisor.

mod unix_terminator;

pub use unix_terminator::UnixTerminator;
