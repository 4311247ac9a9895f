//! Classification of failed commit/push commands.
//!
//! A failed command whose output says the working copy is behind the
//! repository history becomes [`ScmError::NeedsUpdate`]; everything else is
//! passed through as a plain command failure. Classification looks only at
//! the captured output text, never at the exit code.

use regex_lite::Regex;
use tracing::{debug, info};

use crate::errors::{ExecError, ScmError};
use crate::scm::BackendKind;

/// Out-of-date signatures printed by `svn commit`.
const SVN_SIGNATURES: &[&str] = &[
    r"resource out of date; try updating",
    r"(?i)'[^']+' is out of date",
    r"E155011",
    r"E160028",
    r"E170004",
];

/// Out-of-date signatures printed by `git svn dcommit` and `git push`.
const GIT_SIGNATURES: &[&str] = &[
    r"Merge conflict during commit",
    r"is probably out-of-date",
    r"resource out of date; try updating",
    r"\[rejected\].*\((non-fast-forward|fetch first)\)",
    r"Updates were rejected because the (tip|remote)",
];

/// Pattern table mapping known failure signatures to "needs update".
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    signatures: Vec<Regex>,
}

impl ErrorClassifier {
    /// Build a classifier from raw regex patterns.
    pub fn new(patterns: &[&str]) -> Result<Self, ScmError> {
        let signatures = patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| ScmError::InvalidArgument(format!("bad signature '{}': {}", p, e))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { signatures })
    }

    /// The table for one backend.
    pub fn for_backend(kind: BackendKind) -> Self {
        let patterns = match kind {
            BackendKind::Svn => SVN_SIGNATURES,
            BackendKind::Git => GIT_SIGNATURES,
        };
        Self::from_static(patterns)
    }

    /// Union of both tables, for callers that do not know which tool ran.
    pub fn any_backend() -> Self {
        let mut patterns = SVN_SIGNATURES.to_vec();
        patterns.extend_from_slice(GIT_SIGNATURES);
        Self::from_static(&patterns)
    }

    fn from_static(patterns: &[&str]) -> Self {
        // Built-in tables are constants compiled by `test_builtin_tables_compile`.
        let signatures = patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .unwrap_or_else(|e| panic!("built-in signature '{}' is invalid: {}", p, e))
            })
            .collect();
        Self { signatures }
    }

    pub fn is_needs_update(&self, output: &str) -> bool {
        self.signatures.iter().any(|re| re.is_match(output))
    }

    /// Turn a command failure into the matching backend error.
    pub fn classify(&self, err: ExecError) -> ScmError {
        if let ExecError::CommandFailed { .. } = &err {
            let output = err.output();
            if self.is_needs_update(&output) {
                info!("command output indicates the checkout is out of date");
                return ScmError::NeedsUpdate { output };
            }
        }
        debug!(error = %err, "command failure is not an out-of-date signature");
        ScmError::Command(err)
    }
}

/// Classify a commit failure against every known signature.
pub fn commit_error_handler(err: ExecError) -> ScmError {
    ErrorClassifier::any_backend().classify(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIT_FAILURE: &str = "Merge conflict during commit: Your file or directory 'WebCore/ChangeLog' is probably out-of-date: resource out of date; try updating at /usr/local/libexec/git-core//git-svn line 469";
    const SVN_FAILURE: &str = "svn: Commit failed (details follow):\nsvn: File or directory 'ChangeLog' is out of date; try updating\nsvn: resource out of date; try updating\n";

    fn failure(output: &str) -> ExecError {
        ExecError::CommandFailed {
            program: "tool".into(),
            args: Vec::new(),
            exit_code: 1,
            stdout: output.into(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_out_of_date_output_needs_update() {
        assert!(commit_error_handler(failure(GIT_FAILURE)).is_needs_update());
        assert!(commit_error_handler(failure(SVN_FAILURE)).is_needs_update());
    }

    #[test]
    fn test_other_output_is_plain_failure() {
        let err = commit_error_handler(failure("blah blah blah"));
        assert!(matches!(err, ScmError::Command(ExecError::CommandFailed { .. })));
    }

    #[test]
    fn test_missing_tool_is_never_needs_update() {
        let err = commit_error_handler(ExecError::ToolMissing("svn".into()));
        assert!(err.is_tool_missing());
    }

    #[test]
    fn test_backend_tables() {
        let svn = ErrorClassifier::for_backend(BackendKind::Svn);
        assert!(svn.is_needs_update(SVN_FAILURE));
        assert!(svn.is_needs_update("svn: E155011: File '/wc/a' is out of date"));
        assert!(!svn.is_needs_update("svn: E155007: '/tmp' is not a working copy"));

        let git = ErrorClassifier::for_backend(BackendKind::Git);
        assert!(git.is_needs_update(GIT_FAILURE));
        assert!(git.is_needs_update(
            " ! [rejected]        main -> main (fetch first)\nerror: failed to push some refs"
        ));
        assert!(!git.is_needs_update("fatal: not a git repository"));
    }

    #[test]
    fn test_stderr_is_inspected() {
        let err = ExecError::CommandFailed {
            program: "svn".into(),
            args: Vec::new(),
            exit_code: 1,
            stdout: "Sending        ChangeLog\n".into(),
            stderr: SVN_FAILURE.into(),
        };
        assert!(ErrorClassifier::for_backend(BackendKind::Svn)
            .classify(err)
            .is_needs_update());
    }

    #[test]
    fn test_builtin_tables_compile() {
        for table in [SVN_SIGNATURES, GIT_SIGNATURES] {
            let classifier = ErrorClassifier::new(table).unwrap();
            assert_eq!(classifier.signatures.len(), table.len());
        }
        assert_eq!(
            ErrorClassifier::any_backend().signatures.len(),
            SVN_SIGNATURES.len() + GIT_SIGNATURES.len()
        );
    }

    #[test]
    fn test_custom_table() {
        let classifier = ErrorClassifier::new(&["stale lock"]).unwrap();
        assert!(classifier.classify(failure("error: stale lock held")).is_needs_update());
        assert!(ErrorClassifier::new(&["("]).is_err());
    }
}
