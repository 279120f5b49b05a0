use async_trait::async_trait;

/// OS process identifier of the spawned server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a tree-termination attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Process tree was terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Insufficient privileges to signal the process
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

impl TerminationResult {
    /// A result that leaves no live process behind counts as success.
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Success | Self::ProcessNotFound)
    }
}

impl std::fmt::Display for TerminationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "terminated"),
            Self::ProcessNotFound => write!(f, "process not found"),
            Self::AccessDenied => write!(f, "permission denied"),
            Self::Failed(message) => write!(f, "{message}"),
        }
    }
}

/// Platform seam for taking down the spawned server and its descendants.
#[async_trait]
pub trait ProcessTerminator: Send + Sync {
    /// Terminate the process and every descendant it spawned, escalating
    /// from graceful to forced as needed.
    async fn terminate_tree(&self, root: ProcessId) -> TerminationResult;

    /// Synchronous best-effort kill for drop paths. Errors are discarded;
    /// teardown must complete unconditionally.
    fn kill_tree_blocking(&self, root: ProcessId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeded_categorization() {
        assert!(TerminationResult::Success.succeeded());
        assert!(TerminationResult::ProcessNotFound.succeeded());
        assert!(!TerminationResult::AccessDenied.succeeded());
        assert!(!TerminationResult::Failed("test".to_string()).succeeded());
    }

    #[test]
    fn test_display_carries_failure_detail() {
        let result = TerminationResult::Failed("SIGKILL failed: EINVAL".to_string());
        assert_eq!(format!("{result}"), "SIGKILL failed: EINVAL");
        assert_eq!(
            format!("{}", TerminationResult::AccessDenied),
            "permission denied"
        );
    }

    #[test]
    fn test_process_id_display() {
        assert_eq!(format!("{}", ProcessId::from(4321u32)), "4321");
    }
}
