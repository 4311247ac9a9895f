//! scmbridge core library.
//!
//! This crate provides a uniform interface over Subversion and Git working
//! copies: process execution, backend detection, the shared backend
//! contract, error classification, and a patch engine that applies text,
//! binary and ChangeLog changes to a checkout.

pub mod checkout;
pub mod classify;
pub mod config;
pub mod detect;
pub mod errors;
pub mod exec;
pub mod git;
pub mod patch;
pub mod scm;
pub mod svn;

// Re-exports for convenience.
pub use checkout::Checkout;
pub use config::ScmConfig;
pub use detect::{detect_scm_system, find_checkout, Detector};
pub use errors::{CoreError, ExecError, PatchError, ScmError};
pub use exec::{Executive, SystemExecutive};
pub use patch::{ApplyReport, Patch};
pub use scm::{Backend, BackendKind, LocalCommits, Revision, Scm};
