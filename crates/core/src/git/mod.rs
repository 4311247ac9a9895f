//! Git backend, including `git svn` mirrors.

pub mod backend;

pub use backend::GitBackend;
