//! Terminal rendering of conveyor reports.
//!
//! Every command either prints human-readable report lines (colored when the
//! stream supports it) or, with `-o json`, a single JSON document on stdout.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use conveyor_lib::conveyor::{BuildReport, CacheStatus, FlushReport, PublishReport, PushStatus};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// Leading mark of a report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
  Done,
  Failed,
  Skipped,
  Note,
}

impl Mark {
  fn symbol(self) -> &'static str {
    match self {
      Mark::Done => "✓",
      Mark::Failed => "✗",
      Mark::Skipped => "⚠",
      Mark::Note => "•",
    }
  }

  /// Failures and skips go to stderr.
  fn stream(self) -> Stream {
    match self {
      Mark::Done | Mark::Note => Stream::Stdout,
      Mark::Failed | Mark::Skipped => Stream::Stderr,
    }
  }
}

pub fn line(mark: Mark, message: &str) {
  let stream = mark.stream();
  let raw = mark.symbol();
  let symbol = raw.if_supports_color(stream, |s| match mark {
    Mark::Done => s.green().to_string(),
    Mark::Failed => s.red().to_string(),
    Mark::Skipped => s.yellow().to_string(),
    Mark::Note => s.blue().to_string(),
  });
  match stream {
    Stream::Stdout => println!("{} {}", symbol, message),
    _ => eprintln!("{} {}", symbol, message),
  }
}

/// Indented, dimmed line under the previous report line.
fn detail(message: &str) {
  println!("    {}", message.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

/// `label: value` summary line.
pub fn stat(label: &str, value: impl std::fmt::Display) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
  println!("{}", json);
  Ok(())
}

/// Byte count with a binary unit, one decimal above bytes.
pub fn human_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

/// Elapsed time rounded to milliseconds.
pub fn human_duration(elapsed: Duration) -> String {
  let rounded = Duration::from_millis(elapsed.as_millis() as u64);
  humantime::format_duration(rounded).to_string()
}

fn cache_word(status: CacheStatus) -> &'static str {
  match status {
    CacheStatus::Hit => "cached",
    CacheStatus::Miss => "built",
    CacheStatus::Building => "failed",
  }
}

/// One line per image, then one per stage with its short signature.
pub fn build_report(report: &BuildReport) {
  for image in &report.images {
    match &image.result {
      Ok(layer) => line(Mark::Done, &format!("{} {}", image.image, short(layer.as_str()))),
      Err(e) if e.is_skip() => line(Mark::Skipped, &e.to_string()),
      Err(e) => line(Mark::Failed, &e.to_string()),
    }
    for stage in &image.stages {
      detail(&format!(
        "{:<15} {}  {}",
        stage.stage.as_str(),
        stage.signature.short(),
        cache_word(stage.status)
      ));
    }
  }
}

pub fn build_totals(report: &BuildReport, elapsed: Duration) {
  let count = |status| report.images.iter().map(|i| i.count(status)).sum::<usize>();
  stat("Stages built", count(CacheStatus::Miss));
  stat("Stages cached", count(CacheStatus::Hit));
  stat("Duration", human_duration(elapsed));
}

/// One line per pushed or confirmed tag, then the image error if any.
pub fn publish_report(report: &PublishReport) {
  for image in &report.images {
    for tag in &image.tags {
      let status = match tag.status {
        PushStatus::Pushed => "pushed",
        PushStatus::Unchanged => "unchanged",
      };
      line(Mark::Done, &format!("{} → {} ({})", image.image, tag.target, status));
    }
    if let Some(e) = &image.error {
      line(Mark::Failed, &e.to_string());
    }
  }
}

pub fn flush_report(report: &FlushReport) {
  line(Mark::Done, &format!("Flushed {}", report.storage));
  for signature in &report.removed {
    detail(signature.short());
  }
  stat("Stages removed", report.removed.len());
}

/// Layer references are long hashes; twelve characters identify them.
fn short(reference: &str) -> &str {
  let hex = reference.strip_prefix("sha256:").unwrap_or(reference);
  &hex[..hex.len().min(12)]
}
