//! conveyor-lib: stage-based container image builds and publishing.
//!
//! An image is a chain of stages. Each stage is identified by a signature
//! derived from its inputs; built stages are kept in a stages storage shared by
//! every builder of the project, so a stage is only executed when its
//! signature has never been built before:
//! - `config`: the validated project configuration
//! - `signature`: stage signatures
//! - `storage`: stages storage (local directory or image registry)
//! - `lock`: cross-process named locks
//! - `executor`: backends that turn instructions into layers
//! - `conveyor`: build ordering, caching and publishing
//! - `tag`: tag strategies and registry-safe tag slugs

pub mod config;
pub mod consts;
pub mod conveyor;
pub mod executor;
pub mod lock;
pub mod paths;
pub mod registry;
pub mod session;
pub mod signature;
pub mod ssh_agent;
pub mod storage;
pub mod tag;
pub mod tmp;
pub mod types;
pub mod util;
pub mod vcs;
