//! The backend capability contract.
//!
//! [`Scm`] is implemented by both backends and covers everything calling code
//! needs to treat a checkout uniformly. Operations that only make sense for a
//! distributed backend live on the secondary [`LocalCommits`] trait, reached
//! through [`Scm::as_local_commits`]. [`Backend`] is the closed set of
//! variants handed out by the detector.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::ScmConfig;
use crate::errors::ScmError;
use crate::git::GitBackend;
use crate::svn::SvnBackend;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which tool a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Svn,
    Git,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Svn => "svn",
            Self::Git => "git",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A revision as given by a caller.
///
/// `Number` is a Subversion revision; on a git checkout it is mapped through
/// `git svn find-rev`. `Commitish` is any other expression (symbolic name,
/// `HEAD~2`, a hash, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Revision {
    Number(u64),
    Commitish(String),
}

impl Revision {
    /// `42` and `r42` are numbers, anything else is a commitish.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('r').unwrap_or(trimmed);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = digits.parse::<u64>() {
                return Self::Number(n);
            }
        }
        Self::Commitish(trimmed.to_string())
    }
}

impl FromStr for Revision {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<u64> for Revision {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Commitish(c) => f.write_str(c),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Operations shared by every backend.
///
/// All paths going in and out are relative to [`Scm::checkout_root`], and no
/// operation depends on the process working directory.
pub trait Scm: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Top of the working tree.
    fn checkout_root(&self) -> &Path;

    fn display_name(&self) -> &'static str {
        self.kind().name()
    }

    fn supports_local_commits(&self) -> bool {
        self.as_local_commits().is_some()
    }

    /// Distributed-only operations, when this backend has them.
    fn as_local_commits(&self) -> Option<&dyn LocalCommits> {
        None
    }

    /// Files that differ from the last committed state, sorted.
    fn changed_files(&self) -> Result<Vec<String>, ScmError>;

    /// Changed files that are newly scheduled for addition, sorted.
    ///
    /// The svn backend may also report added directories.
    fn added_files(&self) -> Result<Vec<String>, ScmError>;

    /// Files touched by exactly one revision, sorted.
    fn changed_files_for_revision(&self, revision: &Revision) -> Result<Vec<String>, ScmError>;

    /// Exact contents of `path` at `revision`.
    fn contents_at_revision(&self, path: &str, revision: &Revision) -> Result<Vec<u8>, ScmError>;

    /// Unified diff of the changes introduced by `revision`.
    fn diff_for_revision(&self, revision: &Revision) -> Result<String, ScmError>;

    /// Undo `revision` in the working tree (not committed).
    fn apply_reverse_diff(&self, revision: &Revision) -> Result<(), ScmError>;

    /// Unified diff of all uncommitted local changes.
    fn create_patch(&self) -> Result<String, ScmError>;

    /// Commit local changes and return the tool's commit text.
    ///
    /// With `dry_run` nothing is changed and the returned text carries the
    /// null revision (`0`).
    fn commit_with_message(
        &self,
        message: &str,
        username: Option<&str>,
        dry_run: bool,
    ) -> Result<String, ScmError>;

    /// Extract the revision number embedded in commit text.
    fn revision_from_commit_text(&self, text: &str) -> Option<u64>;

    fn add(&self, paths: &[&str]) -> Result<(), ScmError>;

    fn delete(&self, paths: &[&str]) -> Result<(), ScmError>;

    fn revert_files(&self, paths: &[&str]) -> Result<(), ScmError>;

    /// Drop every uncommitted change, including added files and directories
    /// and any interrupted merge or rebase. Safe to call on a clean tree.
    fn clean_working_directory(&self) -> Result<(), ScmError>;

    fn last_commit_log(&self) -> Result<String, ScmError>;

    fn commit_log(&self, revision: &Revision) -> Result<String, ScmError>;

    fn committer_email_for_revision(&self, revision: &Revision) -> Result<String, ScmError>;

    /// Whether credentials for the configured server realm are stored under
    /// `home_directory`. Never touches the network.
    fn has_authorization_for_realm(&self, home_directory: &Path) -> Result<bool, ScmError>;
}

/// Operations for backends with local, not yet pushed, history.
pub trait LocalCommits {
    /// One-line summaries of commits not yet pushed upstream, newest first.
    fn local_commits(&self) -> Result<Vec<String>, ScmError>;

    fn discard_local_commits(&self) -> Result<(), ScmError>;

    fn rebase_in_progress(&self) -> Result<bool, ScmError>;

    fn delete_branch(&self, name: &str) -> Result<(), ScmError>;

    /// Resolve each argument to commit ids and concatenate the results.
    ///
    /// `A..B` ranges come back oldest first; `A...B` is rejected. With no
    /// arguments, the local commits on top of the upstream branch are used.
    fn commit_ids_from_commitish_arguments(&self, args: &[&str]) -> Result<Vec<String>, ScmError>;

    fn read_config(&self, key: &str) -> Result<Option<String>, ScmError>;

    /// Name of the branch tracking the upstream history.
    fn svn_branch_name(&self) -> Result<String, ScmError>;

    /// Merge base between HEAD and the upstream branch.
    fn svn_merge_base(&self) -> Result<String, ScmError>;

    fn create_patch_from_local_commit(&self, commitish: &str) -> Result<String, ScmError>;

    fn create_patch_since_local_commit(&self, commitish: &str) -> Result<String, ScmError>;
}

// ---------------------------------------------------------------------------
// Closed set of backends
// ---------------------------------------------------------------------------

/// A backend bound to one checkout root.
pub enum Backend {
    Svn(SvnBackend),
    Git(GitBackend),
}

impl Backend {
    pub fn as_scm(&self) -> &(dyn Scm + 'static) {
        match self {
            Self::Svn(svn) => svn,
            Self::Git(git) => git,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.as_scm().checkout_root().to_path_buf()
    }

    pub fn config(&self) -> &ScmConfig {
        match self {
            Self::Svn(svn) => svn.config(),
            Self::Git(git) => git.config(),
        }
    }
}

impl Deref for Backend {
    type Target = dyn Scm;

    fn deref(&self) -> &Self::Target {
        self.as_scm()
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind())
            .field("root", &self.checkout_root())
            .finish()
    }
}

impl From<SvnBackend> for Backend {
    fn from(svn: SvnBackend) -> Self {
        Self::Svn(svn)
    }
}

impl From<GitBackend> for Backend {
    fn from(git: GitBackend) -> Self {
        Self::Git(git)
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Sort and de-duplicate a list of paths.
pub(crate) fn sorted_paths<I>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    paths.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// The current user's home directory, the default place to look for stored
/// credentials.
pub fn home_directory() -> Result<PathBuf, ScmError> {
    dirs::home_dir()
        .ok_or_else(|| ScmError::InvalidArgument("cannot determine the home directory".into()))
}

/// Search `<home>/.subversion` for a file mentioning `realm`.
pub(crate) fn realm_in_credential_store(home: &Path, realm: &str) -> Result<bool, ScmError> {
    let store = home.join(".subversion");
    if !store.is_dir() {
        debug!(path = %store.display(), "no subversion config directory");
        return Ok(false);
    }
    for entry in WalkDir::new(&store).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        // Unreadable files cannot hold usable credentials either.
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        if String::from_utf8_lossy(&bytes).contains(realm) {
            debug!(path = %entry.path().display(), "found credentials for realm");
            return Ok(true);
        }
    }
    Ok(false)
}
