use std::path::PathBuf;
use thiserror::Error;

/// Error types for supervisor operations
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no bundled dufs binary for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("dufs executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("server is already running")]
    AlreadyRunning,

    #[error("failed to spawn dufs: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("{}", immediate_exit_message(.diagnostic, .exit_code))]
    ImmediateExit {
        /// Stderr text accumulated before the process died, trimmed.
        diagnostic: String,
        exit_code: Option<i32>,
    },

    #[error("failed to terminate server: {0}")]
    TerminationFailed(String),
}

impl SupervisorError {
    pub fn immediate_exit(diagnostic: String, exit_code: Option<i32>) -> Self {
        Self::ImmediateExit {
            diagnostic,
            exit_code,
        }
    }

    /// Check if this error came out of a failed start attempt, i.e. the
    /// supervisor is guaranteed to be idle afterwards.
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPlatform { .. }
                | Self::ExecutableNotFound(_)
                | Self::SpawnFailed(_)
                | Self::ImmediateExit { .. }
        )
    }
}

fn immediate_exit_message(diagnostic: &str, exit_code: &Option<i32>) -> String {
    if !diagnostic.is_empty() {
        diagnostic.to_string()
    } else {
        match exit_code {
            Some(code) => format!("dufs exited immediately after start (exit code: {code})"),
            None => "dufs exited immediately after start".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_exit_prefers_stderr() {
        let error = SupervisorError::immediate_exit("error: invalid port".to_string(), Some(2));
        let display = format!("{error}");
        assert_eq!(display, "error: invalid port");
    }

    #[test]
    fn test_immediate_exit_falls_back_to_exit_code() {
        let error = SupervisorError::immediate_exit(String::new(), Some(7));
        let display = format!("{error}");
        assert!(display.contains("exit code: 7"));
    }

    #[test]
    fn test_immediate_exit_without_code() {
        let error = SupervisorError::immediate_exit(String::new(), None);
        let display = format!("{error}");
        assert!(display.contains("exited immediately"));
        assert!(!display.contains("exit code"));
    }

    #[test]
    fn test_start_failure_categorization() {
        assert!(SupervisorError::immediate_exit(String::new(), Some(1)).is_start_failure());
        assert!(
            SupervisorError::ExecutableNotFound(PathBuf::from("/missing/dufs")).is_start_failure()
        );
        assert!(!SupervisorError::AlreadyRunning.is_start_failure());
        assert!(!SupervisorError::TerminationFailed("test".to_string()).is_start_failure());
    }
}
