use anyhow::Result;
use async_trait::async_trait;
use dufs_supervisor_core::{ProcessId, ProcessTerminator, TerminationResult};
use std::time::Duration;
use sysinfo::System;
use tokio::process::Command;
use tracing::{info, warn};

/// Delay between the graceful taskkill and the forced follow-up.
const ESCALATION_DELAY: Duration = Duration::from_millis(500);

/// Windows tree termination built on `taskkill /T`, with a manual sysinfo
/// walk as the fallback when taskkill cannot resolve the tree.
pub struct WindowsTerminator {
    system: std::sync::Mutex<System>,
}

impl WindowsTerminator {
    pub fn new() -> Self {
        Self {
            system: std::sync::Mutex::new(System::new_all()),
        }
    }

    /// Use taskkill to terminate a single process.
    async fn taskkill(&self, pid: u32, force: bool) -> Result<bool> {
        let pid_string = pid.to_string();
        let mut args = vec!["/PID", &pid_string];
        if force {
            args.push("/F");
        }

        let output = Command::new("taskkill").args(&args).output().await?;
        Ok(output.status.success())
    }

    /// Use taskkill with /T to terminate a whole process tree.
    async fn taskkill_tree(&self, pid: u32) -> Result<bool> {
        let output = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await?;
        Ok(output.status.success())
    }

    /// Terminate a single process by PID with graceful -> forced escalation.
    async fn terminate_single(&self, pid: ProcessId) -> TerminationResult {
        match self.taskkill(pid.0, false).await {
            Ok(true) => {
                info!(pid = %pid, "sent graceful termination to process");
                tokio::time::sleep(ESCALATION_DELAY).await;

                if self.is_alive(pid) {
                    match self.taskkill(pid.0, true).await {
                        Ok(_) => {
                            info!(pid = %pid, "force killed process");
                            TerminationResult::Success
                        }
                        Err(e) => {
                            warn!(pid = %pid, error = %e, "failed to force kill process");
                            TerminationResult::Failed(format!("force kill failed: {e}"))
                        }
                    }
                } else {
                    info!(pid = %pid, "process terminated gracefully");
                    TerminationResult::Success
                }
            }
            Ok(false) => TerminationResult::ProcessNotFound,
            Err(e) => {
                warn!(pid = %pid, error = %e, "failed to run taskkill");
                TerminationResult::Failed(format!("taskkill failed: {e}"))
            }
        }
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        let mut system = self.system.lock().unwrap();
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            sysinfo::ProcessRefreshKind::default(),
        );
        system.processes().iter().any(|(p, _)| p.as_u32() == pid.0)
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

impl Default for WindowsTerminator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessTerminator for WindowsTerminator {
    async fn terminate_tree(&self, root: ProcessId) -> TerminationResult {
        match self.taskkill_tree(root.0).await {
            Ok(true) => {
                info!(root = %root, "terminated process tree");
                TerminationResult::Success
            }
            Ok(false) => TerminationResult::ProcessNotFound,
            Err(e) => {
                warn!(root = %root, error = %e, "taskkill /T failed, walking the tree manually");

                // Bottom-up so parents cannot respawn what we just killed.
                let children = self.find_children(root);
                for child in children.iter().rev() {
                    match self.terminate_single(*child).await {
                        TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                        result => {
                            warn!(pid = %child, result = ?result, "failed to terminate child process");
                        }
                    }
                }

                self.terminate_single(root).await
            }
        }
    }

    fn kill_tree_blocking(&self, root: ProcessId) {
        let _ = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &root.0.to_string()])
            .output();
    }
}

#[cfg(test)]
#[cfg(windows)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_tree_reaps_spawned_process() {
        let terminator = WindowsTerminator::new();
        let mut child = std::process::Command::new("timeout")
            .args(["/T", "30"])
            .spawn()
            .expect("spawn timeout");
        let pid = ProcessId::from(child.id());

        let result = terminator.terminate_tree(pid).await;
        assert!(result.succeeded(), "unexpected result: {result:?}");

        let status = child.wait().expect("reap timeout");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_tree_on_dead_pid_is_not_an_error() {
        let terminator = WindowsTerminator::new();
        let mut child = std::process::Command::new("cmd")
            .args(["/C", "exit 0"])
            .spawn()
            .expect("spawn cmd");
        let pid = ProcessId::from(child.id());
        child.wait().expect("reap");

        let result = terminator.terminate_tree(pid).await;
        assert!(result.succeeded(), "unexpected result: {result:?}");
    }
}
