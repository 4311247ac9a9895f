//! Checkout-level workflows layered on a backend: applying patch documents
//! and deriving commit information from ChangeLogs and commit logs.

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::errors::{PatchError, ScmError};
use crate::patch::{changelog, parse_patch, ApplyReport, Patch, PatchApplier};
use crate::scm::{Backend, Revision};

const BUG_URL_MARKER: &str = "show_bug.cgi?id=";

/// A detected checkout together with the workflows that operate on it.
#[derive(Debug)]
pub struct Checkout {
    backend: Backend,
    today: Option<NaiveDate>,
}

impl Checkout {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            today: None,
        }
    }

    /// Pin the date used for new ChangeLog entries instead of the local
    /// calendar date.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Parse and apply a patch to the working tree.
    ///
    /// Nothing is written unless every file in the patch applies; created
    /// and deleted files are scheduled with the backend.
    pub fn apply_patch(&self, patch: &Patch, force: bool) -> Result<ApplyReport, PatchError> {
        let parsed = parse_patch(&patch.contents)?;
        info!(
            files = parsed.files.len(),
            url = patch.url.as_deref().unwrap_or("-"),
            force,
            "applying patch"
        );
        let mut applier = PatchApplier::new(self.backend.as_scm(), &self.backend.config().patch)
            .reviewer(patch.reviewer.as_deref());
        if let Some(today) = self.today {
            applier = applier.today(today);
        }
        applier.apply(&parsed, force)
    }

    /// Changed files that are ChangeLogs.
    pub fn modified_changelogs(&self) -> Result<Vec<String>, ScmError> {
        let patch_config = &self.backend.config().patch;
        Ok(self
            .backend
            .changed_files()?
            .into_iter()
            .filter(|path| patch_config.is_changelog(path))
            .collect())
    }

    /// Newest entry of the ChangeLog at `path` in the working tree.
    pub fn latest_entry(&self, path: &str) -> Result<Option<String>, ScmError> {
        let contents = std::fs::read_to_string(self.backend.checkout_root().join(path))?;
        Ok(changelog::latest_entry(&contents))
    }

    /// Commit message assembled from the newest entry of every modified
    /// ChangeLog, separated by blank lines.
    pub fn commit_message_for_this_commit(&self) -> Result<String, ScmError> {
        let changelogs = self.modified_changelogs()?;
        if changelogs.is_empty() {
            return Err(ScmError::NotFound {
                path: "ChangeLog".into(),
                revision: "working copy".into(),
                detail: "no modified ChangeLog files".into(),
            });
        }

        let mut entries = Vec::with_capacity(changelogs.len());
        for path in &changelogs {
            match self.latest_entry(path)? {
                Some(entry) => entries.push(entry),
                None => {
                    return Err(ScmError::NotFound {
                        path: path.clone(),
                        revision: "working copy".into(),
                        detail: "no ChangeLog entry found".into(),
                    })
                }
            }
        }
        debug!(changelogs = ?changelogs, "built commit message");
        Ok(entries.join("\n"))
    }

    /// Bug number linked from the commit log of `revision`, if any.
    pub fn bug_id_for_revision(&self, revision: &Revision) -> Result<Option<u64>, ScmError> {
        let log = self.backend.commit_log(revision)?;
        Ok(bug_id_from_text(&log))
    }

    pub fn apply_reverse_diff(&self, revision: &Revision) -> Result<(), ScmError> {
        self.backend.apply_reverse_diff(revision)
    }
}

/// First `show_bug.cgi?id=<digits>` in `text`.
fn bug_id_from_text(text: &str) -> Option<u64> {
    text.match_indices(BUG_URL_MARKER).find_map(|(at, marker)| {
        let rest = &text[at + marker.len()..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        rest[..end].parse().ok()
    })
}
