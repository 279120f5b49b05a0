use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Parameters for one start attempt.
///
/// Validation (directory existence, port range, port availability) is the
/// caller's job; the supervisor turns these three fields into a dufs
/// invocation as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(setter(into))]
pub struct StartRequest {
    /// Directory to serve.
    pub serve_path: PathBuf,
    /// TCP port dufs listens on.
    pub port: u16,
    /// Read-write serving (`--allow-all`) instead of read-only.
    #[builder(default)]
    #[serde(default)]
    pub allow_all: bool,
}

impl StartRequest {
    pub fn builder() -> StartRequestBuilder {
        StartRequestBuilder::default()
    }

    /// Argument vector for the dufs invocation:
    /// `--port <port> [--allow-all] <path>`.
    ///
    /// Trailing path separators are trimmed; each argument is passed to the
    /// OS verbatim, so no shell quoting is involved.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["--port".to_string(), self.port.to_string()];
        if self.allow_all {
            args.push("--allow-all".to_string());
        }
        args.push(trim_trailing_separators(&self.serve_path));
        args
    }
}

fn trim_trailing_separators(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        // A bare root like "/" must survive untouched.
        raw.into_owned()
    } else {
        trimmed.to_string()
    }
}
