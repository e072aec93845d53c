mod cmd;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{CiSystem, GlobalArgs, PublishArgs, TaggingStrategyArg};
use output::{Mark, line};

/// conveyor - stage-based container image builder
#[derive(Parser)]
#[command(name = "conveyor")]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[command(flatten)]
  global: GlobalArgs,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build images, reusing every stage already in the stages storage
  Build {
    /// Images to build (default: all)
    images: Vec<String>,
  },

  /// Push built images to the images repository
  Publish {
    /// Images to publish (default: all)
    images: Vec<String>,

    #[command(flatten)]
    args: PublishArgs,
  },

  /// Build images, then publish the ones that built
  BuildAndPublish {
    /// Images to build and publish (default: all)
    images: Vec<String>,

    #[command(flatten)]
    args: PublishArgs,
  },

  /// Stages storage maintenance
  Stages {
    #[command(subcommand)]
    command: StagesCommands,
  },

  /// Print shell exports for a CI job
  CiEnv {
    #[arg(value_enum)]
    system: CiSystem,

    #[arg(long, value_enum)]
    tagging_strategy: TaggingStrategyArg,
  },

  /// Remove temporary directories of dead conveyor processes
  Gc {
    /// Show what would be removed without removing it
    #[arg(long)]
    dry_run: bool,
  },
}

#[derive(Subcommand)]
enum StagesCommands {
  /// Remove every stage of the project from the stages storage
  Flush,
}

fn init_tracing(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(verbose > 1)
    .without_time()
    .init();
}

fn main() {
  let cli = Cli::parse();
  init_tracing(cli.global.verbose);

  let global = &cli.global;
  let result = match &cli.command {
    Commands::Build { images } => cmd::cmd_build(global, images),
    Commands::Publish { images, args } => cmd::cmd_publish(global, images, args),
    Commands::BuildAndPublish { images, args } => cmd::cmd_build_and_publish(global, images, args),
    Commands::Stages {
      command: StagesCommands::Flush,
    } => cmd::cmd_stages_flush(global),
    Commands::CiEnv {
      system,
      tagging_strategy,
    } => cmd::cmd_ci_env(*system, *tagging_strategy),
    Commands::Gc { dry_run } => cmd::cmd_gc(global, *dry_run),
  };

  if let Err(e) = result {
    line(Mark::Failed, &format!("{:#}", e));
    std::process::exit(1);
  }
}
