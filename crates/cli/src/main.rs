mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::{BuildArgs, DiffArgs, ProjectArgs};

/// cachet - rule keys and artifact caching for target-graph builds
#[derive(Parser)]
#[command(name = "cachet")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  /// Project root
  #[arg(long, global = true, default_value = ".")]
  root: PathBuf,

  /// Target graph JSON file, relative to the project root
  #[arg(long, global = true, default_value = "cachet-graph.json")]
  graph: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build targets, restoring outputs from the cache where possible
  Build {
    #[arg(required = true)]
    targets: Vec<String>,

    /// Stop scheduling new work after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Maximum number of rules building at once
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the rule key of each target
  Rulekey {
    #[arg(required = true)]
    targets: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the content hash of files, directories or archive members (`lib.zip!/a.txt`)
  Hash {
    #[arg(required = true)]
    paths: Vec<String>,
  },

  /// Explain why a target's rule key differs between two rule-key logs
  Diff {
    left: PathBuf,
    right: PathBuf,
    target: String,

    /// Also list the referenced rules that caused each change
    #[arg(long)]
    show_causes: bool,

    /// Inspect changed paths on the local disk
    #[arg(long)]
    check_paths: bool,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let project = ProjectArgs {
    root: cli.root,
    graph: cli.graph,
  };
  let result = match cli.command {
    Commands::Build {
      targets,
      fail_fast,
      threads,
      json,
    } => cmd::cmd_build(
      &project,
      &BuildArgs {
        targets,
        fail_fast,
        threads,
        json,
      },
    ),
    Commands::Rulekey { targets, json } => cmd::cmd_rulekey(&project, &targets, json).map(|()| 0),
    Commands::Hash { paths } => cmd::cmd_hash(&project, &paths).map(|()| 0),
    Commands::Diff {
      left,
      right,
      target,
      show_causes,
      check_paths,
    } => cmd::cmd_diff(
      &project,
      &DiffArgs {
        left,
        right,
        target,
        show_causes,
        check_paths,
      },
    )
    .map(|()| 0),
  };

  match result {
    Ok(code) => ExitCode::from(code),
    Err(e) => {
      output::print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}

fn init_tracing(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
