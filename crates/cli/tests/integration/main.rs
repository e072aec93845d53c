#![cfg(unix)]

mod build_tests;
mod ci_env_tests;
mod common;
mod gc_tests;
mod publish_tests;
