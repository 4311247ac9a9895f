//! Helpers shared by the end-to-end tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempDir;

pub fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run a command in `dir`, panicking on failure, and return its stdout.
pub fn run(dir: &Path, program: &str, args: &[&str]) -> String {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .unwrap_or_else(|e| panic!("failed to start {}: {}", program, e));
    assert!(
        output.status.success(),
        "{} {:?} failed: {}",
        program,
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn write(dir: &Path, path: &str, contents: &str) {
    let full = dir.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, contents).unwrap();
}

pub fn read(dir: &Path, path: &str) -> String {
    std::fs::read_to_string(dir.join(path)).unwrap()
}

/// A repository and working copy holding four commits:
///
/// 1. `test_file` = "test1"
/// 2. `test_file` = "test1test2", plus `test_dir/test_file3`
/// 3. `test_file` = "test1test2test3\n", plus `test_file2`
/// 4. `test_file` = "test1test2test3\ntest4\n"
pub struct SvnFixture {
    pub tmp: TempDir,
    pub repo_url: String,
    pub wc: PathBuf,
}

impl SvnFixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        run(tmp.path(), "svnadmin", &["create", repo.to_str().unwrap()]);
        let repo_url = format!("file://{}", repo.display());
        let wc = tmp.path().join("wc");
        run(
            tmp.path(),
            "svn",
            &["checkout", "--quiet", &repo_url, wc.to_str().unwrap()],
        );
        // Detection returns canonical roots.
        let wc = wc.canonicalize().unwrap();

        write(&wc, "test_file", "test1");
        run(&wc, "svn", &["add", "test_file"]);
        run(&wc, "svn", &["commit", "--quiet", "--message", "initial commit"]);

        write(&wc, "test_file", "test1test2");
        write(&wc, "test_dir/test_file3", "third file");
        run(&wc, "svn", &["add", "test_dir"]);
        run(&wc, "svn", &["commit", "--quiet", "--message", "second commit"]);

        write(&wc, "test_file", "test1test2test3\n");
        write(&wc, "test_file2", "second file");
        run(&wc, "svn", &["add", "test_file2"]);
        run(&wc, "svn", &["commit", "--quiet", "--message", "third commit"]);

        write(&wc, "test_file", "test1test2test3\ntest4\n");
        run(&wc, "svn", &["commit", "--quiet", "--message", "fourth commit"]);

        run(&wc, "svn", &["update", "--quiet"]);
        Self {
            tmp,
            repo_url,
            wc,
        }
    }

    /// A second working copy of the same repository.
    pub fn second_checkout(&self) -> PathBuf {
        let wc = self.tmp.path().join("wc2");
        run(
            self.tmp.path(),
            "svn",
            &["checkout", "--quiet", &self.repo_url, wc.to_str().unwrap()],
        );
        wc.canonicalize().unwrap()
    }
}

/// The same four commits in a plain git repository.
pub struct GitFixture {
    pub tmp: TempDir,
    pub wc: PathBuf,
}

impl GitFixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        std::fs::create_dir_all(&wc).unwrap();
        let wc = wc.canonicalize().unwrap();
        run(&wc, "git", &["init", "--quiet"]);
        run(&wc, "git", &["config", "user.name", "Test User"]);
        run(&wc, "git", &["config", "user.email", "test@example.com"]);

        let commit = |message: &str| {
            run(&wc, "git", &["add", "-A"]);
            run(&wc, "git", &["commit", "--quiet", "-m", message]);
        };

        write(&wc, "test_file", "test1");
        commit("initial commit");
        write(&wc, "test_file", "test1test2");
        write(&wc, "test_dir/test_file3", "third file");
        commit("second commit");
        write(&wc, "test_file", "test1test2test3\n");
        write(&wc, "test_file2", "second file");
        commit("third commit");
        write(&wc, "test_file", "test1test2test3\ntest4\n");
        commit("fourth commit");

        Self { tmp, wc }
    }
}
