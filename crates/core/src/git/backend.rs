//! Distributed backend: a git checkout, optionally mirroring a Subversion
//! repository through `git svn`.
//!
//! Working-tree operations go through the git command line via the
//! [`Executive`]; configuration, branch and repository-state queries use
//! `git2` directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{BranchType, ErrorCode, Repository, RepositoryState};
use tracing::{debug, info, instrument, warn};

use crate::classify::ErrorClassifier;
use crate::config::ScmConfig;
use crate::errors::{ExecError, ScmError};
use crate::exec::{ExecRequest, Executive};
use crate::scm::{
    realm_in_credential_store, sorted_paths, BackendKind, LocalCommits, Revision, Scm,
};

pub const DRY_RUN_COMMIT_TEXT: &str = "Dry run, no remote commit.\nCommitted r0";

/// stderr fragments printed by `git show` for a path or revision that does
/// not exist.
const NOT_FOUND_SIGNATURES: &[&str] = &[
    "does not exist in",
    "exists on disk, but not in",
    "bad revision",
    "invalid object name",
];

/// A git working tree rooted at `root`.
pub struct GitBackend {
    root: PathBuf,
    exec: Arc<dyn Executive>,
    config: ScmConfig,
    classifier: ErrorClassifier,
}

impl GitBackend {
    pub fn new(root: impl Into<PathBuf>, exec: Arc<dyn Executive>, config: ScmConfig) -> Self {
        let root = root.into();
        info!(root = %root.display(), "using git backend");
        Self {
            root,
            exec,
            config,
            classifier: ErrorClassifier::for_backend(BackendKind::Git),
        }
    }

    pub fn config(&self) -> &ScmConfig {
        &self.config
    }

    fn git(&self) -> ExecRequest {
        ExecRequest::new(&self.config.tools.git).current_dir(&self.root)
    }

    fn run(&self, request: ExecRequest) -> Result<String, ScmError> {
        Ok(self.exec.run_text(&request)?)
    }

    fn repo(&self) -> Result<Repository, ScmError> {
        Ok(Repository::open(&self.root)?)
    }

    /// Map a revision onto a git commitish. Subversion numbers are looked up
    /// in the `git svn` metadata.
    pub fn commitish_for(&self, revision: &Revision) -> Result<String, ScmError> {
        match revision {
            Revision::Commitish(c) => Ok(c.clone()),
            Revision::Number(n) => {
                let output = self.run(self.git().args(["svn", "find-rev"]).arg(format!("r{}", n)))?;
                let hash = output.trim();
                if hash.is_empty() {
                    return Err(ScmError::NotFound {
                        path: self.root.display().to_string(),
                        revision: format!("r{}", n),
                        detail: "no git commit mirrors this svn revision".into(),
                    });
                }
                debug!(revision = n, %hash, "mapped svn revision");
                Ok(hash.to_string())
            }
        }
    }

    /// Whether this checkout mirrors a Subversion repository.
    pub fn has_svn_remote(&self) -> Result<bool, ScmError> {
        Ok(self.read_config("svn-remote.svn.url")?.is_some())
    }

    fn with_paths(&self, request: ExecRequest, paths: &[&str]) -> Result<(), ScmError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.run(request.args(paths.iter().copied()))?;
        Ok(())
    }
}

fn is_not_found(err: &ExecError) -> bool {
    match err {
        ExecError::CommandFailed { stderr, .. } => {
            let stderr = stderr.to_lowercase();
            NOT_FOUND_SIGNATURES.iter().any(|sig| stderr.contains(sig))
        }
        _ => false,
    }
}

fn non_empty_lines(output: &str) -> impl Iterator<Item = String> + '_ {
    output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

/// Parse `git diff --name-status` output for the given status letters.
fn parse_name_status(output: &str, codes: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (status, path) = line.split_once('\t')?;
            let code = status.chars().next()?;
            (codes.contains(code) && status.len() == 1).then(|| path.to_string())
        })
        .collect()
}

/// Revision number from `git svn dcommit` output.
fn parse_dcommit_revision(text: &str) -> Option<u64> {
    text.lines()
        .filter_map(|line| line.trim_end().strip_prefix("Committed r"))
        .find_map(|rest| rest.parse().ok())
}

impl Scm for GitBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Git
    }

    fn checkout_root(&self) -> &Path {
        &self.root
    }

    fn as_local_commits(&self) -> Option<&dyn LocalCommits> {
        Some(self)
    }

    fn changed_files(&self) -> Result<Vec<String>, ScmError> {
        let output = self.run(self.git().args(["diff", "--name-status", "HEAD"]))?;
        Ok(sorted_paths(parse_name_status(&output, "ADM")))
    }

    fn added_files(&self) -> Result<Vec<String>, ScmError> {
        let output = self.run(self.git().args(["diff", "--name-status", "HEAD"]))?;
        Ok(sorted_paths(parse_name_status(&output, "A")))
    }

    fn changed_files_for_revision(&self, revision: &Revision) -> Result<Vec<String>, ScmError> {
        let commit = self.commitish_for(revision)?;
        let output = self.run(self.git().args([
            "diff-tree",
            "--no-commit-id",
            "--name-only",
            "-r",
            "--root",
            commit.as_str(),
        ]))?;
        Ok(sorted_paths(non_empty_lines(&output)))
    }

    fn contents_at_revision(&self, path: &str, revision: &Revision) -> Result<Vec<u8>, ScmError> {
        let commit = self.commitish_for(revision)?;
        let request = self.git().arg("show").arg(format!("{}:{}", commit, path));
        match self.exec.run(&request) {
            Ok(output) => Ok(output.stdout),
            Err(err) if is_not_found(&err) => Err(ScmError::NotFound {
                path: path.to_string(),
                revision: revision.to_string(),
                detail: err.output(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn diff_for_revision(&self, revision: &Revision) -> Result<String, ScmError> {
        let commit = self.commitish_for(revision)?;
        self.create_patch_from_local_commit(&commit)
    }

    fn apply_reverse_diff(&self, revision: &Revision) -> Result<(), ScmError> {
        let commit = self.commitish_for(revision)?;
        info!(%commit, "reverting commit in working tree");
        self.run(self.git().args(["revert", "--no-commit", commit.as_str()]))?;
        Ok(())
    }

    fn create_patch(&self) -> Result<String, ScmError> {
        self.run(self.git().args(["diff", "--binary", "--no-ext-diff", "HEAD"]))
    }

    #[instrument(skip(self, message))]
    fn commit_with_message(
        &self,
        message: &str,
        username: Option<&str>,
        dry_run: bool,
    ) -> Result<String, ScmError> {
        if dry_run {
            info!("dry run, skipping git commit");
            return Ok(DRY_RUN_COMMIT_TEXT.to_string());
        }
        let commit_output = self
            .exec
            .run_text(&self.git().args(["commit", "--all", "-F", "-"]).stdin(message))
            .map_err(|e| self.classifier.classify(e))?;
        if !self.has_svn_remote()? {
            info!("committed locally, no svn remote configured");
            return Ok(commit_output);
        }
        let mut dcommit = self.git().args(["svn", "dcommit"]);
        if let Some(user) = username {
            dcommit = dcommit.args(["--username", user]);
        }
        let output = self
            .exec
            .run_text(&dcommit)
            .map_err(|e| self.classifier.classify(e))?;
        info!(revision = ?parse_dcommit_revision(&output), "git svn dcommit succeeded");
        Ok(output)
    }

    fn revision_from_commit_text(&self, text: &str) -> Option<u64> {
        parse_dcommit_revision(text)
    }

    fn add(&self, paths: &[&str]) -> Result<(), ScmError> {
        self.with_paths(self.git().arg("add"), paths)
    }

    fn delete(&self, paths: &[&str]) -> Result<(), ScmError> {
        self.with_paths(self.git().args(["rm", "-f", "--ignore-unmatch", "--"]), paths)
    }

    fn revert_files(&self, paths: &[&str]) -> Result<(), ScmError> {
        self.with_paths(self.git().args(["checkout", "HEAD", "--"]), paths)
    }

    fn clean_working_directory(&self) -> Result<(), ScmError> {
        self.run(self.git().args(["reset", "--hard", "HEAD"]))?;
        if self.rebase_in_progress()? {
            info!("aborting interrupted rebase");
            self.run(self.git().args(["rebase", "--abort"]))?;
        }
        if self.repo()?.state() == RepositoryState::Merge {
            info!("aborting interrupted merge");
            self.run(self.git().args(["merge", "--abort"]))?;
        }
        Ok(())
    }

    fn last_commit_log(&self) -> Result<String, ScmError> {
        self.run(self.git().args(["log", "-1"]))
    }

    fn commit_log(&self, revision: &Revision) -> Result<String, ScmError> {
        let commit = self.commitish_for(revision)?;
        self.run(self.git().args(["log", "-1", commit.as_str()]))
    }

    fn committer_email_for_revision(&self, revision: &Revision) -> Result<String, ScmError> {
        let commitish = self.commitish_for(revision)?;
        let repo = self.repo()?;
        let commit = repo.revparse_single(&commitish)?.peel_to_commit()?;
        let email = commit.committer().email().unwrap_or_default().to_string();
        Ok(email)
    }

    fn has_authorization_for_realm(&self, home_directory: &Path) -> Result<bool, ScmError> {
        realm_in_credential_store(home_directory, &self.config.svn.server_realm)
    }
}

impl LocalCommits for GitBackend {
    fn local_commits(&self) -> Result<Vec<String>, ScmError> {
        let branch = self.svn_branch_name()?;
        let output = self.run(
            self.git()
                .args(["log", "--pretty=oneline"])
                .arg(format!("HEAD...{}", branch)),
        )?;
        Ok(non_empty_lines(&output).collect())
    }

    fn discard_local_commits(&self) -> Result<(), ScmError> {
        let branch = self.svn_branch_name()?;
        info!(%branch, "discarding local commits");
        self.run(self.git().args(["reset", "--hard", branch.as_str()]))?;
        Ok(())
    }

    fn rebase_in_progress(&self) -> Result<bool, ScmError> {
        let repo = self.repo()?;
        let git_dir = repo.path();
        Ok(git_dir.join("rebase-apply").exists() || git_dir.join("rebase-merge").exists())
    }

    fn delete_branch(&self, name: &str) -> Result<(), ScmError> {
        let repo = self.repo()?;
        let mut branch = repo.find_branch(name, BranchType::Local)?;
        branch.delete()?;
        info!(name, "deleted branch");
        Ok(())
    }

    fn commit_ids_from_commitish_arguments(&self, args: &[&str]) -> Result<Vec<String>, ScmError> {
        let default_range;
        let args = if args.is_empty() {
            default_range = format!("{}..HEAD", self.svn_branch_name()?);
            vec![default_range.as_str()]
        } else {
            args.to_vec()
        };

        let mut ids = Vec::new();
        for commitish in args {
            if commitish.contains("...") {
                return Err(ScmError::InvalidArgument(format!(
                    "'...' is not supported (found in '{}'). Did you mean '..'?",
                    commitish
                )));
            }
            if commitish.contains("..") {
                let output = self.run(self.git().args(["rev-list", commitish]))?;
                let mut range: Vec<String> = non_empty_lines(&output).collect();
                range.reverse();
                ids.extend(range);
            } else {
                let output = self.run(self.git().args(["rev-parse", "--revs-only", commitish]))?;
                ids.extend(non_empty_lines(&output));
            }
        }
        debug!(count = ids.len(), "resolved commit ids");
        Ok(ids)
    }

    fn read_config(&self, key: &str) -> Result<Option<String>, ScmError> {
        let repo = self.repo()?;
        let snapshot = repo.config()?.snapshot()?;
        match snapshot.get_string(key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn svn_branch_name(&self) -> Result<String, ScmError> {
        if let Some(fetch) = self.read_config("svn-remote.svn.fetch")? {
            // trunk:refs/remotes/trunk
            if let Some((_, remote_ref)) = fetch.split_once(':') {
                let name = remote_ref.strip_prefix("refs/remotes/").unwrap_or(remote_ref);
                if !name.is_empty() {
                    return Ok(name.to_string());
                }
            }
            warn!(%fetch, "unrecognised svn-remote.svn.fetch value");
        }
        let output = self.run(self.git().args(["rev-parse", "--abbrev-ref", "@{upstream}"]))?;
        let upstream = output.trim();
        if upstream.is_empty() {
            return Err(ScmError::Parse("no upstream branch configured".into()));
        }
        Ok(upstream.to_string())
    }

    fn svn_merge_base(&self) -> Result<String, ScmError> {
        let branch = self.svn_branch_name()?;
        let output = self.run(self.git().args(["merge-base", branch.as_str(), "HEAD"]))?;
        Ok(output.trim().to_string())
    }

    fn create_patch_from_local_commit(&self, commitish: &str) -> Result<String, ScmError> {
        self.run(self.git().args(["diff", "--binary"]).arg(format!("{}^!", commitish)))
    }

    fn create_patch_since_local_commit(&self, commitish: &str) -> Result<String, ScmError> {
        self.run(self.git().args(["diff", "--binary"]).arg(format!("{}..", commitish)))
    }
}
