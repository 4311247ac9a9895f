//! Subversion backend.

pub mod backend;
pub mod parser;

pub use backend::SvnBackend;
pub use parser::{SvnInfo, SvnLogEntry};
