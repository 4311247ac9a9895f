//! Error types for the scmbridge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Execution errors
// ---------------------------------------------------------------------------

/// Errors from running an external program.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The program could not be located or started.
    #[error("{0} binary not found")]
    ToolMissing(String),

    /// The program ran and exited with a non-zero status.
    #[error("{program} command failed (exit {exit_code}): {}", .stderr.trim())]
    CommandFailed {
        program: String,
        args: Vec<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Generic I/O wrapper (pipe failures and the like).
    #[error("exec I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ExecError {
    /// Everything the failed command printed, stdout first.
    ///
    /// Returns an empty string for errors that never produced output.
    pub fn output(&self) -> String {
        match self {
            Self::CommandFailed { stdout, stderr, .. } => {
                let mut text = stdout.clone();
                if !text.is_empty() && !text.ends_with('\n') && !stderr.is_empty() {
                    text.push('\n');
                }
                text.push_str(stderr);
                text
            }
            _ => String::new(),
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend errors
// ---------------------------------------------------------------------------

/// Errors from the backend capability contract and the detector.
#[derive(Debug, Error)]
pub enum ScmError {
    /// The underlying tool was missing or failed.
    #[error(transparent)]
    Command(#[from] ExecError),

    /// The working copy is behind the repository history; update and retry.
    #[error("checkout needs update: {}", .output.trim())]
    NeedsUpdate { output: String },

    /// The path did not exist at the requested revision (or could not be
    /// retrieved, see `contents_at_revision`).
    #[error("'{path}' not found at revision {revision}: {}", .detail.trim())]
    NotFound {
        path: String,
        revision: String,
        detail: String,
    },

    /// A malformed argument, e.g. an unsupported commitish expression.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No supported checkout encloses the given path.
    #[error("no svn or git checkout found at or above '{0}'")]
    NotACheckout(String),

    /// The operation is not available on this backend.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Tool output could not be understood.
    #[error("failed to parse tool output: {0}")]
    Parse(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// Generic I/O wrapper.
    #[error("scm I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ScmError {
    pub fn is_needs_update(&self) -> bool {
        matches!(self, Self::NeedsUpdate { .. })
    }

    pub fn is_tool_missing(&self) -> bool {
        matches!(self, Self::Command(ExecError::ToolMissing(_)))
    }
}

// ---------------------------------------------------------------------------
// Patch errors
// ---------------------------------------------------------------------------

/// Errors from parsing or applying a patch.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The patch document is malformed.
    #[error("malformed patch at line {line}: {detail}")]
    Parse { line: usize, detail: String },

    /// A hunk could not be applied, or was already applied.
    #[error("patch conflict in '{path}': {detail}")]
    Conflict { path: String, detail: String },

    /// A binary payload could not be decoded.
    #[error("cannot decode binary patch for '{path}': {detail}")]
    BinaryDecode { path: String, detail: String },

    /// The patch targets a path outside the checkout.
    #[error("patch path escapes the checkout: {0}")]
    InvalidPath(String),

    /// A backend operation (add, delete, ...) failed.
    #[error(transparent)]
    Scm(#[from] ScmError),

    /// Generic I/O wrapper.
    #[error("patch I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PatchError {
    pub fn conflict(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Conflict {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stdout: &str, stderr: &str) -> ExecError {
        ExecError::CommandFailed {
            program: "svn".into(),
            args: vec!["commit".into()],
            exit_code: 1,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn test_error_display_messages() {
        let err = ExecError::ToolMissing("svn".into());
        assert_eq!(err.to_string(), "svn binary not found");

        let err = failed("", "svn: E155007: not a working copy\n");
        assert_eq!(
            err.to_string(),
            "svn command failed (exit 1): svn: E155007: not a working copy"
        );

        let err = ScmError::NotACheckout("/tmp/x".into());
        assert!(err.to_string().contains("/tmp/x"));

        let err = ScmError::Unsupported {
            backend: "svn",
            operation: "local_commits",
        };
        assert_eq!(
            err.to_string(),
            "local_commits is not supported by the svn backend"
        );

        let err = PatchError::conflict("ChangeLog", "hunk #1 does not apply");
        assert!(err.is_conflict());
        assert!(err.to_string().contains("ChangeLog"));
    }

    #[test]
    fn test_exec_output_joins_streams() {
        assert_eq!(failed("out", "err").output(), "out\nerr");
        assert_eq!(failed("out\n", "err").output(), "out\nerr");
        assert_eq!(failed("", "err").output(), "err");
        assert_eq!(ExecError::ToolMissing("git".into()).output(), "");
        assert_eq!(failed("", "").exit_code(), Some(1));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let scm_err: ScmError = ExecError::ToolMissing("git".into()).into();
        assert!(scm_err.is_tool_missing());
        let core_err: CoreError = scm_err.into();
        assert!(matches!(core_err, CoreError::Scm(_)));

        let patch_err: PatchError = ScmError::NeedsUpdate {
            output: "out of date".into(),
        }
        .into();
        let core_err: CoreError = patch_err.into();
        assert!(matches!(core_err, CoreError::Patch(PatchError::Scm(_))));
    }
}
