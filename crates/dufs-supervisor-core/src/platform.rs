use crate::SupervisorError;
use std::path::{Path, PathBuf};

/// Map an (OS, CPU architecture) pair to the platform-rid tag used in the
/// bundled `runtimes/<rid>/bin/` layout. Inputs use the `std::env::consts`
/// vocabulary.
pub fn platform_rid(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("windows", "x86_64") => Some("win-x64"),
        ("windows", "aarch64") => Some("win-arm64"),
        ("linux", "x86_64") => Some("linux-x64"),
        ("linux", "aarch64") => Some("linux-arm64"),
        ("macos", "x86_64") => Some("osx-x64"),
        ("macos", "aarch64") => Some("osx-arm64"),
        _ => None,
    }
}

/// Name of the bundled server binary on the given OS.
pub fn executable_name(os: &str) -> &'static str {
    if os == "windows" { "dufs.exe" } else { "dufs" }
}

/// Resolve the bundled dufs binary relative to `base`.
///
/// A binary sitting directly beside the host executable wins; otherwise the
/// `runtimes/<rid>/bin/` layout is assumed. The returned path is not checked
/// for existence here, that happens at start time.
pub fn locate_executable_in(
    base: &Path,
    os: &str,
    arch: &str,
) -> Result<PathBuf, SupervisorError> {
    let rid = platform_rid(os, arch).ok_or_else(|| SupervisorError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    })?;
    let exe = executable_name(os);

    let sibling = base.join(exe);
    if sibling.is_file() {
        return Ok(sibling);
    }
    Ok(base.join("runtimes").join(rid).join("bin").join(exe))
}

/// Resolve the bundled dufs binary for the host, looking next to the
/// currently running executable.
pub fn locate_executable() -> Result<PathBuf, SupervisorError> {
    let base = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    locate_executable_in(&base, std::env::consts::OS, std::env::consts::ARCH)
}
