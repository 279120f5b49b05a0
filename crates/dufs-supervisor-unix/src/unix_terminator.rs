#[cfg(unix)]
mod unix_impl {
    use async_trait::async_trait;
    use dufs_supervisor_core::{ProcessId, ProcessTerminator, TerminationResult};
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::time::Duration;
    use sysinfo::System;
    use tracing::{info, warn};

    /// Delay between the graceful signal and the forced follow-up.
    const ESCALATION_DELAY: Duration = Duration::from_millis(500);

    /// Unix tree termination: the spawned server runs in its own process
    /// group, so group signals take the whole tree down at once. A manual
    /// sysinfo walk covers processes that escaped the group.
    pub struct UnixTerminator {
        system: std::sync::Mutex<System>,
    }

    impl UnixTerminator {
        pub fn new() -> Self {
            Self {
                system: std::sync::Mutex::new(System::new_all()),
            }
        }

        /// SIGTERM to the process group, then SIGKILL after the escalation
        /// delay.
        async fn terminate_group(&self, pid: ProcessId) -> TerminationResult {
            let pgid = NixPid::from_raw(pid.0 as i32);

            match signal::killpg(pgid, Signal::SIGTERM) {
                Ok(()) => {
                    info!(pgid = %pid, "sent SIGTERM to process group");
                    tokio::time::sleep(ESCALATION_DELAY).await;

                    match signal::killpg(pgid, Signal::SIGKILL) {
                        Ok(()) => {
                            info!(pgid = %pid, "sent SIGKILL to process group");
                            TerminationResult::Success
                        }
                        Err(nix::errno::Errno::ESRCH) => {
                            info!(pgid = %pid, "process group already terminated");
                            TerminationResult::Success
                        }
                        Err(e) => {
                            warn!(pgid = %pid, error = %e, "failed to SIGKILL process group");
                            TerminationResult::Failed(format!(
                                "SIGKILL to process group failed: {e}"
                            ))
                        }
                    }
                }
                Err(nix::errno::Errno::ESRCH) => TerminationResult::ProcessNotFound,
                Err(nix::errno::Errno::EPERM) => {
                    warn!(pgid = %pid, "permission denied to terminate process group");
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!(pgid = %pid, error = %e, "failed to SIGTERM process group");
                    TerminationResult::Failed(format!("SIGTERM to process group failed: {e}"))
                }
            }
        }

        /// Terminate a single process by PID with SIGTERM -> SIGKILL
        /// escalation.
        async fn terminate_single(&self, pid: ProcessId) -> TerminationResult {
            let nix_pid = NixPid::from_raw(pid.0 as i32);

            match signal::kill(nix_pid, Signal::SIGTERM) {
                Ok(()) => {
                    info!(pid = %pid, "sent SIGTERM to process");
                    tokio::time::sleep(ESCALATION_DELAY).await;

                    match signal::kill(nix_pid, Signal::SIGKILL) {
                        Ok(()) => {
                            info!(pid = %pid, "sent SIGKILL to process");
                            TerminationResult::Success
                        }
                        Err(nix::errno::Errno::ESRCH) => {
                            info!(pid = %pid, "process already terminated");
                            TerminationResult::Success
                        }
                        Err(e) => {
                            warn!(pid = %pid, error = %e, "failed to SIGKILL process");
                            TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                        }
                    }
                }
                Err(nix::errno::Errno::ESRCH) => TerminationResult::ProcessNotFound,
                Err(nix::errno::Errno::EPERM) => {
                    warn!(pid = %pid, "permission denied to terminate process");
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!(pid = %pid, error = %e, "failed to SIGTERM process");
                    TerminationResult::Failed(format!("SIGTERM failed: {e}"))
                }
            }
        }

        fn find_children(&self, parent: ProcessId) -> Vec<ProcessId> {
            let mut system = self.system.lock().unwrap();
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::All,
                true,
                sysinfo::ProcessRefreshKind::default(),
            );

            let mut children = Vec::new();
            Self::find_children_recursive(&system, parent.0, &mut children);
            children.into_iter().map(ProcessId::from).collect()
        }

        /// Recursively find all child processes, grandchildren first.
        fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
            for (pid, process) in system.processes() {
                #[allow(clippy::collapsible_if)]
                if let Some(ppid) = process.parent() {
                    if ppid.as_u32() == parent_pid {
                        let child_pid = pid.as_u32();
                        Self::find_children_recursive(system, child_pid, result);
                        result.push(child_pid);
                    }
                }
            }
        }
    }

    impl Default for UnixTerminator {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessTerminator for UnixTerminator {
        async fn terminate_tree(&self, root: ProcessId) -> TerminationResult {
            match self.terminate_group(root).await {
                // The group is gone or was never ours; walk the tree instead.
                TerminationResult::ProcessNotFound => {}
                result => return result,
            }

            let children = self.find_children(root);
            if !children.is_empty() {
                info!(count = children.len(), "terminating child processes");
                // Bottom-up so parents cannot respawn what we just killed.
                for child in children.iter().rev() {
                    match self.terminate_single(*child).await {
                        TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                        result => {
                            warn!(pid = %child, result = ?result, "failed to terminate child process");
                        }
                    }
                }
            }

            self.terminate_single(root).await
        }

        fn kill_tree_blocking(&self, root: ProcessId) {
            let pgid = NixPid::from_raw(root.0 as i32);
            if signal::killpg(pgid, Signal::SIGKILL).is_err() {
                let _ = signal::kill(pgid, Signal::SIGKILL);
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_terminate_tree_reaps_spawned_process() {
            let terminator = UnixTerminator::new();
            let mut child = std::process::Command::new("sleep")
                .arg("30")
                .spawn()
                .expect("spawn sleep");
            let pid = ProcessId::from(child.id());

            let result = terminator.terminate_tree(pid).await;
            assert!(result.succeeded(), "unexpected result: {result:?}");

            let status = child.wait().expect("reap sleep");
            assert!(!status.success());
        }

        #[tokio::test]
        async fn test_terminate_tree_reaps_descendants() {
            let terminator = UnixTerminator::new();
            let dir = std::env::temp_dir().join(format!(
                "dufs-supervisor-unix-tree-{}",
                std::process::id()
            ));
            std::fs::create_dir_all(&dir).expect("create temp dir");
            let pidfile = dir.join("grandchild.pid");

            // The shell is not a group leader here, so this exercises the
            // sysinfo walk rather than the process-group path.
            let mut child = std::process::Command::new("sh")
                .arg("-c")
                .arg(format!("sleep 30 & echo $! > {}; wait", pidfile.display()))
                .spawn()
                .expect("spawn sh");
            let pid = ProcessId::from(child.id());

            let mut grandchild = None;
            for _ in 0..50 {
                if let Ok(text) = std::fs::read_to_string(&pidfile) {
                    if let Ok(p) = text.trim().parse::<i32>() {
                        grandchild = Some(p);
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let grandchild = NixPid::from_raw(grandchild.expect("grandchild pid"));

            let result = terminator.terminate_tree(pid).await;
            assert!(result.succeeded(), "unexpected result: {result:?}");
            child.wait().expect("reap sh");

            // Signal 0 probes existence; ESRCH means the descendant is gone.
            let mut gone = false;
            for _ in 0..50 {
                if signal::kill(grandchild, None).is_err() {
                    gone = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert!(gone, "descendant {grandchild} survived tree termination");

            std::fs::remove_dir_all(&dir).ok();
        }

        #[tokio::test]
        async fn test_terminate_tree_on_dead_pid_is_not_an_error() {
            let terminator = UnixTerminator::new();
            let mut child = std::process::Command::new("true").spawn().expect("spawn");
            let pid = ProcessId::from(child.id());
            child.wait().expect("reap");

            let result = terminator.terminate_tree(pid).await;
            assert!(result.succeeded(), "unexpected result: {result:?}");
        }

        #[test]
        fn test_kill_tree_blocking_swallows_missing_process() {
            let terminator = UnixTerminator::new();
            // Must not panic for a PID that does not exist.
            terminator.kill_tree_blocking(ProcessId::from(0x3FFF_FFF0u32));
        }
    }
}

#[cfg(unix)]
pub use unix_impl::UnixTerminator;

// Stub so the workspace still builds on non-Unix hosts.
#[cfg(not(unix))]
pub struct UnixTerminator;

#[cfg(not(unix))]
impl UnixTerminator {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for UnixTerminator {
    fn default() -> Self {
        Self::new()
    }
}
