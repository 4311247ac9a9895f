//! Blocking execution of external VCS tools.
//!
//! Every backend talks to its tool through the [`Executive`] trait, which is
//! the one seam substituted in tests. [`SystemExecutive`] is the real
//! implementation and runs commands synchronously via `std::process`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::errors::ExecError;

/// A single command invocation: program, arguments, working directory and
/// optional stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
}

impl ExecRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// `program arg1 arg2 ...`, for logging.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, or -1 when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Runs external commands.
///
/// Implementors only provide [`Executive::spawn`], which must return the
/// captured output whatever the exit status, and fail only when the program
/// could not be started. The provided methods layer the raising and
/// non-raising conventions on top.
pub trait Executive: Send + Sync {
    fn spawn(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError>;

    /// Run and fail with [`ExecError::CommandFailed`] on a non-zero exit.
    fn run(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError> {
        let output = self.spawn(request)?;
        if !output.success() {
            let stderr = output.stderr_text();
            warn!(cmd = %request.display(), exit_code = output.exit_code, %stderr, "command failed");
            return Err(ExecError::CommandFailed {
                program: request.program.clone(),
                args: request.args.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout_text(),
                stderr,
            });
        }
        Ok(output)
    }

    /// Run and return stdout as (lossy) UTF-8 text.
    fn run_text(&self, request: &ExecRequest) -> Result<String, ExecError> {
        Ok(self.run(request)?.stdout_text())
    }

    /// Run and return everything the command printed, even when it fails.
    ///
    /// A missing program is still an error.
    fn run_lenient(&self, request: &ExecRequest) -> Result<String, ExecError> {
        let output = self.spawn(request)?;
        let mut text = output.stdout_text();
        text.push_str(&output.stderr_text());
        if !output.success() {
            debug!(cmd = %request.display(), exit_code = output.exit_code, "ignoring command failure");
        }
        Ok(text)
    }
}

/// Executes commands on the host with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutive;

impl Executive for SystemExecutive {
    fn spawn(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &request.cwd {
            cmd.current_dir(dir);
        }

        debug!(cmd = %request.display(), cwd = ?request.cwd, "running command");
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecError::ToolMissing(request.program.clone())
            } else {
                ExecError::IoError(e)
            }
        })?;

        if let Some(input) = &request.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // A child that exits without reading its input closes the pipe.
                if let Err(e) = stdin.write_all(input) {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(ExecError::IoError(e));
                    }
                }
            }
        }

        let output = child.wait_with_output()?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
