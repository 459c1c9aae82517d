mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{CreateArgs, InstallArgs};
use output::OutputFormat;

/// kiln - build and publish native library packages from Lua recipes
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a recipe and publish the package into the local cache
  Create(CreateArgs),

  /// Resolve a recipe's requirements and import their artifacts
  Install(InstallArgs),

  /// Show a recipe's metadata, options and requirements
  Info {
    /// Path to a recipe file or a directory containing recipe.lua
    #[arg(default_value = ".")]
    recipe: PathBuf,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// List packages published in the local cache
  List {
    /// Only show packages whose name contains this text
    filter: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Create(args) => cmd::cmd_create(args),
    Commands::Install(args) => cmd::cmd_install(args),
    Commands::Info { recipe, format } => cmd::cmd_info(&recipe, format),
    Commands::List { filter, format } => cmd::cmd_list(filter.as_deref(), format),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      output::print_error(&format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}
