//! Centralized backend driving the `svn` command line client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::classify::ErrorClassifier;
use crate::config::ScmConfig;
use crate::errors::{ExecError, ScmError};
use crate::exec::{ExecRequest, Executive};
use crate::scm::{realm_in_credential_store, sorted_paths, BackendKind, Revision, Scm};

use super::parser::{self, SvnInfo};

/// Symbolic revisions understood by `svn -r`.
const SYMBOLIC_REVISIONS: &[&str] = &["HEAD", "BASE", "COMMITTED", "PREV"];

pub const DRY_RUN_COMMIT_TEXT: &str = "Dry run, no commit.\nCommitted revision 0.";

/// A Subversion working copy rooted at `root`.
pub struct SvnBackend {
    root: PathBuf,
    exec: Arc<dyn Executive>,
    config: ScmConfig,
    classifier: ErrorClassifier,
}

impl SvnBackend {
    pub fn new(root: impl Into<PathBuf>, exec: Arc<dyn Executive>, config: ScmConfig) -> Self {
        let root = root.into();
        info!(root = %root.display(), "using svn backend");
        Self {
            root,
            exec,
            config,
            classifier: ErrorClassifier::for_backend(BackendKind::Svn),
        }
    }

    pub fn config(&self) -> &ScmConfig {
        &self.config
    }

    fn svn(&self) -> ExecRequest {
        ExecRequest::new(&self.config.tools.svn).current_dir(&self.root)
    }

    fn run(&self, request: ExecRequest) -> Result<String, ScmError> {
        Ok(self.exec.run_text(&request)?)
    }

    fn run_with_paths(&self, subcommand: &[&str], paths: &[&str]) -> Result<(), ScmError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.run(
            self.svn()
                .args(subcommand.iter().copied())
                .args(paths.iter().copied()),
        )?;
        Ok(())
    }

    fn revision_arg(&self, revision: &Revision) -> Result<String, ScmError> {
        match revision {
            Revision::Number(n) => Ok(n.to_string()),
            Revision::Commitish(c) if SYMBOLIC_REVISIONS.contains(&c.as_str()) => Ok(c.clone()),
            Revision::Commitish(c) => Err(ScmError::InvalidArgument(format!(
                "'{}' is not a subversion revision",
                c
            ))),
        }
    }

    /// `svn info` for the working copy root.
    pub fn info(&self) -> Result<SvnInfo, ScmError> {
        let xml = self.run(self.svn().args(["info", "--xml", "."]))?;
        parser::parse_svn_info(&xml)
    }

    /// Turn repository URLs (older clients print them for `-c` summaries)
    /// into checkout-relative paths.
    fn relativize(&self, paths: Vec<String>) -> Result<Vec<String>, ScmError> {
        if !paths.iter().any(|p| p.contains("://")) {
            return Ok(paths);
        }
        let base = format!("{}/", self.info()?.url.trim_end_matches('/'));
        Ok(paths
            .into_iter()
            .map(|p| p.strip_prefix(&base).map(str::to_string).unwrap_or(p))
            .collect())
    }
}

impl Scm for SvnBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Svn
    }

    fn checkout_root(&self) -> &Path {
        &self.root
    }

    fn changed_files(&self) -> Result<Vec<String>, ScmError> {
        let output = self.run(self.svn().arg("status"))?;
        Ok(sorted_paths(
            parser::parse_status(&output, "ADM").into_iter().map(|e| e.path),
        ))
    }

    fn added_files(&self) -> Result<Vec<String>, ScmError> {
        let output = self.run(self.svn().arg("status"))?;
        Ok(sorted_paths(
            parser::parse_status(&output, "A").into_iter().map(|e| e.path),
        ))
    }

    fn changed_files_for_revision(&self, revision: &Revision) -> Result<Vec<String>, ScmError> {
        let rev = self.revision_arg(revision)?;
        let output = self.run(self.svn().args(["diff", "--summarize", "-c", rev.as_str()]))?;
        let paths = parser::parse_status(&output, "ADM")
            .into_iter()
            .map(|e| e.path)
            .collect();
        Ok(sorted_paths(self.relativize(paths)?))
    }

    #[instrument(skip(self, revision), fields(root = %self.root.display(), rev = %revision))]
    fn contents_at_revision(&self, path: &str, revision: &Revision) -> Result<Vec<u8>, ScmError> {
        let rev = self.revision_arg(revision)?;
        let request = self.svn().args(["cat", "-r", rev.as_str(), path]);
        match self.exec.run(&request) {
            Ok(output) => Ok(output.stdout),
            Err(ExecError::ToolMissing(tool)) => Err(ExecError::ToolMissing(tool).into()),
            // svn does not tell a missing path apart from other lookup
            // failures, so any failure is reported as not found.
            Err(err) => Err(ScmError::NotFound {
                path: path.to_string(),
                revision: rev,
                detail: err.output(),
            }),
        }
    }

    fn diff_for_revision(&self, revision: &Revision) -> Result<String, ScmError> {
        let rev = self.revision_arg(revision)?;
        self.run(self.svn().args(["diff", "-c", rev.as_str()]))
    }

    #[instrument(skip(self, revision), fields(root = %self.root.display(), rev = %revision))]
    fn apply_reverse_diff(&self, revision: &Revision) -> Result<(), ScmError> {
        let rev = self.revision_arg(revision)?;
        let url = self.info()?.url;
        info!(revision = %rev, "reverse-merging revision");
        self.run(self.svn().args([
            "merge".to_string(),
            "--non-interactive".to_string(),
            "-c".to_string(),
            format!("-{}", rev),
            url,
        ]))?;
        Ok(())
    }

    fn create_patch(&self) -> Result<String, ScmError> {
        if let Some(script) = &self.config.svn.create_patch_script {
            let script_path = self.root.join(script);
            if script_path.is_file() {
                debug!(script = %script_path.display(), "creating patch with script");
                let request =
                    ExecRequest::new(script_path.to_string_lossy()).current_dir(&self.root);
                return self.run(request);
            }
            warn!(script = %script_path.display(), "patch script not found, using svn diff");
        }
        self.run(self.svn().arg("diff"))
    }

    #[instrument(skip(self, message), fields(root = %self.root.display()))]
    fn commit_with_message(
        &self,
        message: &str,
        username: Option<&str>,
        dry_run: bool,
    ) -> Result<String, ScmError> {
        if dry_run {
            info!("dry run, skipping svn commit");
            return Ok(DRY_RUN_COMMIT_TEXT.to_string());
        }
        let mut request = self.svn().args(["commit", "--non-interactive", "-m", message]);
        if let Some(user) = username {
            request = request.args(["--username", user]);
        }
        let output = self
            .exec
            .run_text(&request)
            .map_err(|e| self.classifier.classify(e))?;
        info!(revision = ?parser::parse_committed_revision(&output), "svn commit succeeded");
        Ok(output)
    }

    fn revision_from_commit_text(&self, text: &str) -> Option<u64> {
        parser::parse_committed_revision(text)
    }

    fn add(&self, paths: &[&str]) -> Result<(), ScmError> {
        self.run_with_paths(&["add", "--parents"], paths)
    }

    fn delete(&self, paths: &[&str]) -> Result<(), ScmError> {
        // --force also drops files that are added or locally modified.
        self.run_with_paths(&["delete", "--force"], paths)
    }

    fn revert_files(&self, paths: &[&str]) -> Result<(), ScmError> {
        self.run_with_paths(&["revert"], paths)
    }

    fn clean_working_directory(&self) -> Result<(), ScmError> {
        // Reverting an add leaves the file behind as unversioned.
        let added = self.added_files()?;
        self.run(self.svn().args(["revert", "-R", "."]))?;
        for path in added.iter().rev() {
            let full = self.root.join(path);
            if full.is_dir() {
                std::fs::remove_dir_all(&full)?;
            } else if full.exists() {
                std::fs::remove_file(&full)?;
            }
            debug!(path = %path, "removed previously added path");
        }
        Ok(())
    }

    fn last_commit_log(&self) -> Result<String, ScmError> {
        // Newest revision touching the checkout, even when it is mixed-revision.
        self.run(self.svn().args(["log", "--non-interactive", "--limit=1"]))
    }

    fn commit_log(&self, revision: &Revision) -> Result<String, ScmError> {
        let rev = self.revision_arg(revision)?;
        self.run(self.svn().args(["log", "--non-interactive", "-r", rev.as_str()]))
    }

    fn committer_email_for_revision(&self, revision: &Revision) -> Result<String, ScmError> {
        let rev = self.revision_arg(revision)?;
        let xml = self.run(self.svn().args([
            "log",
            "--non-interactive",
            "--xml",
            "--quiet",
            "-r",
            rev.as_str(),
        ]))?;
        parser::parse_svn_log(&xml)?
            .into_iter()
            .next()
            .map(|entry| entry.author)
            .ok_or_else(|| ScmError::Parse(format!("no log entry for revision {}", rev)))
    }

    fn has_authorization_for_realm(&self, home_directory: &Path) -> Result<bool, ScmError> {
        realm_in_credential_store(home_directory, &self.config.svn.server_realm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::fake::FakeExecutive;

    fn backend(root: &Path) -> (Arc<FakeExecutive>, SvnBackend) {
        let fake = Arc::new(FakeExecutive::new());
        let svn = SvnBackend::new(root, fake.clone(), ScmConfig::default());
        (fake, svn)
    }

    const STATUS: &str = "\
?       scratch.txt
M       test_file
A       test_dir
A       test_dir/test_file3
D       test_file2
";

    #[test]
    fn test_changed_and_added_files() {
        let (fake, svn) = backend(Path::new("/wc"));
        fake.ok(&["svn", "status"], STATUS);
        assert_eq!(
            svn.changed_files().unwrap(),
            vec!["test_dir", "test_dir/test_file3", "test_file", "test_file2"]
        );
        assert_eq!(svn.added_files().unwrap(), vec!["test_dir", "test_dir/test_file3"]);
        let calls = fake.calls();
        assert!(calls.iter().all(|c| c.cwd.as_deref() == Some(Path::new("/wc"))));
    }

    #[test]
    fn test_changed_files_for_revision() {
        let (fake, svn) = backend(Path::new("/wc"));
        fake.ok(
            &["svn", "diff", "--summarize", "-c", "3"],
            "M       test_file\nA       test_file2\n",
        );
        assert_eq!(
            svn.changed_files_for_revision(&Revision::Number(3)).unwrap(),
            vec!["test_file", "test_file2"]
        );
    }

    #[test]
    fn test_changed_files_for_revision_strips_urls() {
        let (fake, svn) = backend(Path::new("/wc"));
        fake.ok(
            &["svn", "diff", "--summarize", "-c", "4"],
            "M       file:///repo/trunk/test_file\n",
        );
        fake.ok(
            &["svn", "info", "--xml"],
            r#"<info><entry revision="4"><url>file:///repo/trunk</url><repository><root>file:///repo</root></repository></entry></info>"#,
        );
        assert_eq!(
            svn.changed_files_for_revision(&Revision::Number(4)).unwrap(),
            vec!["test_file"]
        );
    }

    #[test]
    fn test_contents_at_revision() {
        let (fake, svn) = backend(Path::new("/wc"));
        fake.ok(&["svn", "cat", "-r", "3", "test_file"], "test1test2test3\n");
        fake.fail(
            &["svn", "cat", "-r", "2", "test_file2"],
            "svn: E195012: Unable to find repository location for 'test_file2' in revision 2",
        );
        assert_eq!(
            svn.contents_at_revision("test_file", &Revision::Number(3)).unwrap(),
            b"test1test2test3\n"
        );
        let err = svn
            .contents_at_revision("test_file2", &Revision::Number(2))
            .unwrap_err();
        assert!(matches!(err, ScmError::NotFound { ref revision, .. } if revision == "2"));
    }

    #[test]
    fn test_commitish_revisions_are_rejected() {
        let (fake, svn) = backend(Path::new("/wc"));
        assert!(matches!(
            svn.diff_for_revision(&Revision::Commitish("HEAD~1".into())),
            Err(ScmError::InvalidArgument(_))
        ));
        assert!(svn.commit_log(&Revision::Commitish("HEAD".into())).is_ok());
        assert_eq!(fake.command_lines(), vec!["svn log --non-interactive -r HEAD"]);
    }

    #[test]
    fn test_commit_dry_run_does_not_run_svn() {
        let (fake, svn) = backend(Path::new("/wc"));
        let text = svn.commit_with_message("msg", None, true).unwrap();
        assert_eq!(svn.revision_from_commit_text(&text), Some(0));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_commit_passes_username_and_classifies() {
        let (fake, svn) = backend(Path::new("/wc"));
        fake.ok(&["svn", "commit"], "Sending        test_file\nCommitted revision 7.\n");
        let text = svn.commit_with_message("fix", Some("alice"), false).unwrap();
        assert_eq!(svn.revision_from_commit_text(&text), Some(7));
        assert_eq!(
            fake.command_lines(),
            vec!["svn commit --non-interactive -m fix --username alice"]
        );

        let (fake, svn) = backend(Path::new("/wc"));
        fake.fail(
            &["svn", "commit"],
            "svn: E155011: File '/wc/ChangeLog' is out of date\nsvn: resource out of date; try updating",
        );
        assert!(svn.commit_with_message("fix", None, false).unwrap_err().is_needs_update());

        let (fake, svn) = backend(Path::new("/wc"));
        fake.fail(&["svn", "commit"], "svn: E165001: Commit blocked by pre-commit hook");
        assert!(matches!(
            svn.commit_with_message("fix", None, false),
            Err(ScmError::Command(ExecError::CommandFailed { .. }))
        ));
    }

    #[test]
    fn test_last_commit_log_takes_newest_entry() {
        let (fake, svn) = backend(Path::new("/wc"));
        let log = "------------------------------------------------------------------------\nr4 | tester | 2025-01-10 | 1 line\n\nfourth commit\n";
        fake.ok(&["svn", "log", "--non-interactive", "--limit=1"], log);
        assert_eq!(svn.last_commit_log().unwrap(), log);
        assert_eq!(fake.command_lines(), vec!["svn log --non-interactive --limit=1"]);
    }

    #[test]
    fn test_committer_email() {
        let (fake, svn) = backend(Path::new("/wc"));
        fake.ok(
            &["svn", "log", "--non-interactive", "--xml"],
            r#"<?xml version="1.0"?><log><logentry revision="3"><author>committer@example.com</author><date>2025-01-10</date></logentry></log>"#,
        );
        assert_eq!(
            svn.committer_email_for_revision(&Revision::Number(3)).unwrap(),
            "committer@example.com"
        );
    }

    #[test]
    fn test_apply_reverse_diff_uses_repository_url() {
        let (fake, svn) = backend(Path::new("/wc"));
        fake.ok(
            &["svn", "info", "--xml"],
            r#"<info><entry revision="5"><url>file:///repo/trunk</url><repository><root>file:///repo</root></repository></entry></info>"#,
        );
        svn.apply_reverse_diff(&Revision::Number(3)).unwrap();
        assert_eq!(
            fake.command_lines().last().unwrap(),
            "svn merge --non-interactive -c -3 file:///repo/trunk"
        );
    }

    #[test]
    fn test_clean_working_directory_removes_added_paths() {
        let wc = tempfile::tempdir().unwrap();
        std::fs::create_dir(wc.path().join("test_dir")).unwrap();
        std::fs::write(wc.path().join("test_dir/test_file3"), "3").unwrap();
        std::fs::write(wc.path().join("added_file"), "a").unwrap();
        std::fs::write(wc.path().join("test_file"), "kept").unwrap();

        let (fake, svn) = backend(wc.path());
        fake.ok(
            &["svn", "status"],
            "A       test_dir\nA       test_dir/test_file3\nA       added_file\nM       test_file\n",
        );
        svn.clean_working_directory().unwrap();
        assert!(!wc.path().join("test_dir").exists());
        assert!(!wc.path().join("added_file").exists());
        assert!(wc.path().join("test_file").exists());
        assert!(fake.command_lines().contains(&"svn revert -R .".to_string()));
    }

    #[test]
    fn test_empty_path_lists_are_noops() {
        let (fake, svn) = backend(Path::new("/wc"));
        svn.add(&[]).unwrap();
        svn.revert_files(&[]).unwrap();
        svn.delete(&["a", "b"]).unwrap();
        assert_eq!(fake.command_lines(), vec!["svn delete --force a b"]);
    }

    #[test]
    fn test_create_patch_prefers_script() {
        let wc = tempfile::tempdir().unwrap();
        let mut config = ScmConfig::default();
        config.svn.create_patch_script = Some(PathBuf::from("make-patch"));
        let fake = Arc::new(FakeExecutive::new());
        let svn = SvnBackend::new(wc.path(), fake.clone(), config);

        fake.ok(&["svn", "diff"], "Index: test_file\n");
        assert_eq!(svn.create_patch().unwrap(), "Index: test_file\n");

        std::fs::write(wc.path().join("make-patch"), "#!/bin/sh\n").unwrap();
        let script = wc.path().join("make-patch").to_string_lossy().to_string();
        fake.ok(&[script.as_str()], "scripted\n");
        assert_eq!(svn.create_patch().unwrap(), "scripted\n");
    }

    #[test]
    fn test_backend_identity() {
        let (_fake, svn) = backend(Path::new("/wc"));
        assert_eq!(svn.display_name(), "svn");
        assert!(!svn.supports_local_commits());
        assert!(svn.as_local_commits().is_none());
    }
}
