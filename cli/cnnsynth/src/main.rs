//! cnnsynth CLI: generate CNN accelerator bring-up and inference sources.

mod commands;
mod manifest;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::generate::GenerateOptions;
use manifest::SynthManifest;

#[derive(Parser)]
#[command(name = "cnnsynth", version, about = "CNN accelerator C source synthesizer")]
struct Cli {
    /// Log synthesis phases (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new cnnsynth project
    Init {
        /// Project name
        name: String,
    },
    /// Synthesize the sources described by cnnsynth.toml
    Generate {
        /// Device name, overriding [project].device
        #[arg(long)]
        device: Option<String>,
        /// Output directory, overriding [output].dir
        #[arg(long)]
        output: Option<String>,
        /// Print the synthesis report as JSON
        #[arg(long)]
        json: bool,
        /// Synthesize and report without writing files
        #[arg(long)]
        dry_run: bool,
    },
    /// Device descriptor management
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },
}

#[derive(Subcommand)]
enum DeviceAction {
    /// List built-in and project devices
    List,
    /// Show details of a device
    Describe {
        /// Device name
        name: String,
        /// Output format (text, toml or json)
        #[arg(long)]
        format: Option<String>,
    },
    /// Validate a device descriptor
    Validate {
        /// Device name
        name: String,
    },
    /// Create devices/<name>.device.toml from the default preset
    Template {
        /// Device name
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Init { name } => commands::init::run(&name),

        Commands::Generate {
            device,
            output,
            json,
            dry_run,
        } => {
            let (manifest, project_dir) = load_manifest_required(&cwd)?;
            let opts = GenerateOptions {
                device: device.as_deref(),
                output: output.as_deref(),
                json,
                dry_run,
            };
            commands::generate::run(&project_dir, &manifest, &opts)
        }

        Commands::Device { action } => {
            let project_dir = project_dir_or_cwd(&cwd)?;
            match action {
                DeviceAction::List => commands::device::list(&project_dir),
                DeviceAction::Describe { name, format } => {
                    commands::device::describe(&project_dir, &name, format.as_deref())
                }
                DeviceAction::Validate { name } => commands::device::validate(&project_dir, &name),
                DeviceAction::Template { name } => commands::device::template(&project_dir, &name),
            }
        }
    }
}

/// Load manifest, returning error if not found.
fn load_manifest_required(cwd: &Path) -> anyhow::Result<(SynthManifest, PathBuf)> {
    match SynthManifest::find_and_load(cwd)? {
        Some((manifest, dir)) => Ok((manifest, dir)),
        None => anyhow::bail!("no cnnsynth.toml found (run `cnnsynth init` first)"),
    }
}

/// The enclosing project directory, or `cwd` outside a project.
fn project_dir_or_cwd(cwd: &Path) -> anyhow::Result<PathBuf> {
    Ok(SynthManifest::find_and_load(cwd)?
        .map(|(_, dir)| dir)
        .unwrap_or_else(|| cwd.to_path_buf()))
}
