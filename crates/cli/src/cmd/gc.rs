use std::time::Instant;

use anyhow::{Context, Result};

use conveyor_lib::tmp::TmpManager;

use super::common::GlobalArgs;
use crate::output::{Mark, human_bytes, human_duration, line, print_json, stat};

/// Remove temporary directories left behind by dead conveyor processes.
pub fn cmd_gc(global: &GlobalArgs, dry_run: bool) -> Result<()> {
  let start = Instant::now();

  let result = TmpManager::new(global.tmp_base())
    .sweep_abandoned(dry_run)
    .context("Failed to sweep temporary directories")?;

  if global.output.is_json() {
    print_json(&result)?;
  } else {
    println!();
    if dry_run {
      line(Mark::Note, "Dry run - no changes made");
    } else {
      line(Mark::Done, "Garbage collection complete!");
    }
    stat("Directories scanned", result.stats.scanned);
    stat("Directories removed", result.stats.removed);
    stat("Space freed", human_bytes(result.stats.bytes_freed));
    stat("Duration", human_duration(start.elapsed()));
    if result.stats.failed > 0 {
      line(Mark::Skipped, &format!("{} directories could not be removed", result.stats.failed));
    }
  }

  Ok(())
}
