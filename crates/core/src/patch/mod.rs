//! Patch documents and their application to a checkout.
//!
//! A patch is parsed into [`ParsedPatch`] (see [`parser`]), every file is
//! planned against the current working tree, and only when all files plan
//! cleanly are the results written and the backend told about created or
//! deleted files. A conflict therefore leaves the tree untouched.

pub mod binary;
pub mod changelog;
pub mod parser;
pub mod text;

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PatchConfig;
use crate::errors::PatchError;
use crate::scm::Scm;

pub use parser::parse_patch;

// ---------------------------------------------------------------------------
// Patch documents
// ---------------------------------------------------------------------------

/// A patch to apply, with the metadata used when merging change logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub contents: String,
    pub bug_id: Option<String>,
    pub url: Option<String>,
    pub reviewer: Option<String>,
}

impl Patch {
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            ..Self::default()
        }
    }

    /// Read a patch file. Invalid UTF-8 is replaced, binary payloads are
    /// ASCII-armoured so they survive.
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let mut patch = Self::new(String::from_utf8_lossy(&bytes).to_string());
        patch.url = Some(format!("file://{}", path.as_ref().display()));
        Ok(patch)
    }

    pub fn with_bug_id(mut self, bug_id: impl Into<String>) -> Self {
        self.bug_id = Some(bug_id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_reviewer(mut self, reviewer: impl Into<String>) -> Self {
        self.reviewer = Some(reviewer.into());
        self
    }
}

/// What a file patch does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Modify,
    Create,
    Delete,
}

/// One line of a hunk body. The text keeps its `\n` terminator unless the
/// patch marked it with `\ No newline at end of file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

impl HunkLine {
    pub fn text(&self) -> &str {
        match self {
            Self::Context(t) | Self::Add(t) | Self::Remove(t) => t,
        }
    }

    pub fn is_context(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    pub(crate) fn text_mut(&mut self) -> &mut String {
        match self {
            Self::Context(t) | Self::Add(t) | Self::Remove(t) => t,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines the hunk expects to find (context and removals).
    pub fn preimage(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Add(_)))
            .map(|l| l.text().to_string())
            .collect()
    }

    /// Lines the hunk leaves behind (context and additions).
    pub fn postimage(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Remove(_)))
            .map(|l| l.text().to_string())
            .collect()
    }

    pub fn leading_context(&self) -> usize {
        self.lines.iter().take_while(|l| l.is_context()).count()
    }

    pub fn trailing_context(&self) -> usize {
        self.lines.iter().rev().take_while(|l| l.is_context()).count()
    }

    /// Zero-based line index the preimage starts at.
    pub fn anchor(&self) -> usize {
        if self.old_len == 0 {
            self.old_start
        } else {
            self.old_start.saturating_sub(1)
        }
    }
}

/// One direction of a `GIT binary patch`, already inflated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitBinaryHunk {
    Literal(Vec<u8>),
    Delta(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryPayload {
    /// Forward (old to new) and, when present, reverse (new to old) hunks.
    Git {
        forward: GitBinaryHunk,
        reverse: Option<GitBinaryHunk>,
    },
    /// Whole-file contents from an svn-style base64 body.
    SvnBase64(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Checkout-relative target path.
    pub path: String,
    pub change: FileChange,
    pub hunks: Vec<Hunk>,
    pub binary: Option<BinaryPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPatch {
    pub files: Vec<FilePatch>,
}

/// Outcome of a successful application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Existing files that were modified.
    pub applied: Vec<String>,
    /// Files whose changes were all already present.
    pub skipped: Vec<String>,
    /// Files created and scheduled for addition.
    pub added: Vec<String>,
    /// Files removed and scheduled for deletion.
    pub deleted: Vec<String>,
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// What will happen to one file once every file has planned cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Planned {
    Write {
        path: String,
        contents: Vec<u8>,
        created: bool,
    },
    Delete {
        path: String,
    },
    Skip {
        path: String,
    },
}

/// Applies parsed patches to the working tree of one backend.
pub struct PatchApplier<'a> {
    scm: &'a dyn Scm,
    config: &'a PatchConfig,
    today: NaiveDate,
    reviewer: Option<&'a str>,
}

impl<'a> PatchApplier<'a> {
    pub fn new(scm: &'a dyn Scm, config: &'a PatchConfig) -> Self {
        Self {
            scm,
            config,
            today: chrono::Local::now().date_naive(),
            reviewer: None,
        }
    }

    /// Date written into new change log entries.
    pub fn today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn reviewer(mut self, reviewer: Option<&'a str>) -> Self {
        self.reviewer = reviewer;
        self
    }

    pub fn apply(&self, parsed: &ParsedPatch, force: bool) -> Result<ApplyReport, PatchError> {
        let plans = parsed
            .files
            .iter()
            .map(|file| self.plan(file, force))
            .collect::<Result<Vec<_>, _>>()?;
        self.execute(plans)
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.scm.checkout_root().join(path)
    }

    fn plan(&self, file: &FilePatch, force: bool) -> Result<Planned, PatchError> {
        let full = self.full_path(&file.path);
        let current = match std::fs::read(&full) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        debug!(path = %file.path, change = ?file.change, exists = current.is_some(), "planning file");

        if let Some(payload) = &file.binary {
            return binary::plan(&file.path, file.change, current.as_deref(), payload);
        }

        let placeholders = changelog::Placeholders::new(self.today, self.reviewer);
        let is_changelog = self.config.is_changelog(&file.path);

        match file.change {
            FileChange::Create => {
                let hunks = if is_changelog {
                    placeholders.substitute_hunks(&file.hunks)
                } else {
                    file.hunks.clone()
                };
                let contents: String = hunks
                    .iter()
                    .flat_map(|h| h.postimage())
                    .collect();
                match current {
                    None => Ok(Planned::Write {
                        path: file.path.clone(),
                        contents: contents.into_bytes(),
                        created: true,
                    }),
                    Some(existing) if existing == contents.as_bytes() => {
                        already_applied(&file.path, "file already exists with the patched contents", force)
                    }
                    Some(existing) if existing.is_empty() => Ok(Planned::Write {
                        path: file.path.clone(),
                        contents: contents.into_bytes(),
                        created: false,
                    }),
                    Some(_) => Err(PatchError::conflict(&file.path, "file to create already exists")),
                }
            }
            FileChange::Delete => {
                let Some(existing) = current else {
                    return Err(PatchError::conflict(&file.path, "file to delete does not exist"));
                };
                let existing = as_text(&file.path, existing)?;
                let outcome =
                    text::apply_hunks(&file.path, &existing, &file.hunks, self.config.fuzz, true)?;
                if !outcome.content.is_empty() {
                    return Err(PatchError::conflict(
                        &file.path,
                        "file to delete has contents the patch does not remove",
                    ));
                }
                Ok(Planned::Delete {
                    path: file.path.clone(),
                })
            }
            FileChange::Modify => {
                let Some(existing) = current else {
                    return Err(PatchError::conflict(&file.path, "file to patch does not exist"));
                };
                let existing = as_text(&file.path, existing)?;
                let outcome = if is_changelog {
                    changelog::apply(
                        &file.path,
                        &existing,
                        &file.hunks,
                        &placeholders,
                        self.config.fuzz,
                        force,
                    )?
                } else {
                    text::apply_hunks(&file.path, &existing, &file.hunks, self.config.fuzz, force)?
                };
                if outcome.applied == 0 {
                    return Ok(Planned::Skip {
                        path: file.path.clone(),
                    });
                }
                Ok(Planned::Write {
                    path: file.path.clone(),
                    contents: outcome.content.into_bytes(),
                    created: false,
                })
            }
        }
    }

    fn execute(&self, plans: Vec<Planned>) -> Result<ApplyReport, PatchError> {
        let mut report = ApplyReport::default();
        for plan in plans {
            match plan {
                Planned::Write {
                    path,
                    contents,
                    created,
                } => {
                    let full = self.full_path(&path);
                    if let Some(parent) = full.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&full, contents)?;
                    if created {
                        self.scm.add(&[path.as_str()])?;
                        info!(path = %path, "created file");
                        report.added.push(path);
                    } else {
                        info!(path = %path, "patched file");
                        report.applied.push(path);
                    }
                }
                Planned::Delete { path } => {
                    self.scm.delete(&[path.as_str()])?;
                    let full = self.full_path(&path);
                    if full.exists() {
                        std::fs::remove_file(&full)?;
                    }
                    info!(path = %path, "deleted file");
                    report.deleted.push(path);
                }
                Planned::Skip { path } => {
                    warn!(path = %path, "changes already present, skipped");
                    report.skipped.push(path);
                }
            }
        }
        Ok(report)
    }
}

fn as_text(path: &str, bytes: Vec<u8>) -> Result<String, PatchError> {
    String::from_utf8(bytes)
        .map_err(|_| PatchError::conflict(path, "cannot apply a text patch to a binary file"))
}

fn already_applied(path: &str, detail: &str, force: bool) -> Result<Planned, PatchError> {
    if force {
        return Err(PatchError::conflict(path, detail));
    }
    warn!(path, detail, "skipping");
    Ok(Planned::Skip {
        path: path.to_string(),
    })
}
