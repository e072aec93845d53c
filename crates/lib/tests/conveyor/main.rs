//! End-to-end conveyor tests over the directory executor, local stages
//! storage, file locks and the directory registry.

#![cfg(unix)]

mod build_tests;
mod common;
mod publish_tests;
