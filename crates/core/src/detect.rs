//! Find the checkout enclosing a path and build the matching backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ScmConfig;
use crate::errors::{CoreError, ScmError};
use crate::exec::{Executive, SystemExecutive};
use crate::git::GitBackend;
use crate::scm::{Backend, BackendKind};
use crate::svn::SvnBackend;

/// Where a checkout was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detected {
    pub kind: BackendKind,
    pub root: PathBuf,
}

/// Walk from `path` towards the filesystem root and report the first
/// checkout found.
///
/// A `.svn` directory marks an svn working copy; because older clients put
/// one in every directory, the walk keeps climbing while the parent has one
/// too and reports the topmost. A `.git` entry (directory, or file for
/// worktrees and submodules) marks a git root.
pub fn find_checkout(path: &Path) -> Result<Detected, ScmError> {
    let start = path
        .canonicalize()
        .map_err(|_| ScmError::NotACheckout(path.display().to_string()))?;
    let start = if start.is_dir() {
        start
    } else {
        start.parent().map(Path::to_path_buf).unwrap_or(start)
    };

    for dir in start.ancestors() {
        if dir.join(".svn").is_dir() {
            let mut root = dir;
            while let Some(parent) = root.parent() {
                if !parent.join(".svn").is_dir() {
                    break;
                }
                root = parent;
            }
            debug!(root = %root.display(), "found svn working copy");
            return Ok(Detected {
                kind: BackendKind::Svn,
                root: root.to_path_buf(),
            });
        }
        if dir.join(".git").exists() {
            debug!(root = %dir.display(), "found git checkout");
            return Ok(Detected {
                kind: BackendKind::Git,
                root: dir.to_path_buf(),
            });
        }
    }
    Err(ScmError::NotACheckout(path.display().to_string()))
}

/// Builds backends that share one [`Executive`].
pub struct Detector {
    exec: Arc<dyn Executive>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(Arc::new(SystemExecutive))
    }
}

impl Detector {
    pub fn new(exec: Arc<dyn Executive>) -> Self {
        Self { exec }
    }

    /// Detect the checkout around `path` and bind a backend to its root.
    pub fn detect(&self, path: &Path, config: ScmConfig) -> Result<Backend, ScmError> {
        let Detected { kind, root } = find_checkout(path)?;
        info!(kind = %kind, root = %root.display(), "detected checkout");
        let backend = match kind {
            BackendKind::Svn => Backend::Svn(SvnBackend::new(root, self.exec.clone(), config)),
            BackendKind::Git => Backend::Git(GitBackend::new(root, self.exec.clone(), config)),
        };
        Ok(backend)
    }
}

/// Detect with the system executive and the checkout's own configuration.
pub fn detect_scm_system(path: &Path) -> Result<Backend, CoreError> {
    let found = find_checkout(path)?;
    let config = ScmConfig::discover(&found.root)?;
    Ok(Detector::default().detect(&found.root, config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::Scm;

    #[test]
    fn test_svn_root_is_topmost_svn_directory() {
        let dir = tempfile::tempdir().unwrap();
        let wc = dir.path().join("wc");
        std::fs::create_dir_all(wc.join(".svn")).unwrap();
        std::fs::create_dir_all(wc.join("sub/.svn")).unwrap();
        std::fs::create_dir_all(wc.join("sub/deeper")).unwrap();

        let found = find_checkout(&wc.join("sub/deeper")).unwrap();
        assert_eq!(found.kind, BackendKind::Svn);
        assert_eq!(found.root, wc.canonicalize().unwrap());
    }

    #[test]
    fn test_git_root_and_worktree_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        std::fs::create_dir_all(repo.join("src/nested")).unwrap();
        let found = find_checkout(&repo.join("src/nested")).unwrap();
        assert_eq!(found, Detected { kind: BackendKind::Git, root: repo.canonicalize().unwrap() });

        let worktree = dir.path().join("worktree");
        std::fs::create_dir_all(&worktree).unwrap();
        std::fs::write(worktree.join(".git"), "gitdir: ../repo/.git/worktrees/wt\n").unwrap();
        assert_eq!(find_checkout(&worktree).unwrap().kind, BackendKind::Git);
    }

    #[test]
    fn test_nearest_marker_wins() {
        // An svn working copy inside a git repository.
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let wc = dir.path().join("vendor/wc");
        std::fs::create_dir_all(wc.join(".svn")).unwrap();
        assert_eq!(find_checkout(&wc).unwrap().kind, BackendKind::Svn);
        assert_eq!(find_checkout(dir.path()).unwrap().kind, BackendKind::Git);
    }

    #[test]
    fn test_file_path_uses_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();
        let found = find_checkout(&dir.path().join("file.txt")).unwrap();
        assert_eq!(found.root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_not_a_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();
        // The temp directory itself might live inside a checkout on some
        // machines; only assert when nothing above it is one.
        if let Err(err) = find_checkout(&plain) {
            assert!(matches!(err, ScmError::NotACheckout(_)));
        }
        assert!(matches!(
            find_checkout(&dir.path().join("missing")),
            Err(ScmError::NotACheckout(_))
        ));
    }

    #[test]
    fn test_detector_binds_backend_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        let backend = Detector::default()
            .detect(&dir.path().join("a/b"), ScmConfig::default())
            .unwrap();
        assert!(matches!(backend, Backend::Git(_)));
        assert_eq!(backend.checkout_root(), dir.path().canonicalize().unwrap());
        assert_eq!(backend.display_name(), "git");
    }
}
