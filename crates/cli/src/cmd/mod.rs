mod build;
mod build_and_publish;
mod ci_env;
mod common;
mod gc;
mod publish;
mod stages;

pub use build::cmd_build;
pub use build_and_publish::cmd_build_and_publish;
pub use ci_env::{CiSystem, cmd_ci_env};
pub use common::GlobalArgs;
pub use gc::cmd_gc;
pub use publish::{PublishArgs, TaggingStrategyArg, cmd_publish};
pub use stages::cmd_stages_flush;
