//! `conveyor stages ...`: stages storage maintenance.

use anyhow::{Context, Result};

use super::common::{GlobalArgs, Workspace, runtime};
use crate::output::{self, print_json};

pub fn cmd_stages_flush(global: &GlobalArgs) -> Result<()> {
  let rt = runtime()?;

  let report = rt.block_on(async {
    let workspace = Workspace::open(global, "stages flush").await?;
    let result = workspace.conveyor.flush_stages().await;
    workspace.close().await;
    result.context("Failed to flush stages storage")
  })?;

  if global.output.is_json() {
    print_json(&report)?;
  } else {
    output::flush_report(&report);
  }
  Ok(())
}
