// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use panel_capture::{CaptureMode, Environment};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "panel-capture")]
#[command(about = "Capture display panels under sequenced test patterns")]
#[command(version = panel_capture::constants::app_info::version())]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List {
        /// Use the synthetic camera
        #[arg(long)]
        synthetic: bool,
    },

    /// Run a capture sequence for one panel
    Capture {
        /// Panel identifier
        #[arg(long)]
        ppid: String,

        /// Single production pass or auto/manual comparison
        #[arg(short, long, value_enum, default_value_t = CaptureMode::Production)]
        mode: CaptureMode,

        /// Camera index to use (from 'panel-capture list'); defaults to the last used camera
        #[arg(short, long)]
        camera: Option<usize>,

        /// Use the synthetic camera instead of hardware
        #[arg(long)]
        synthetic: bool,

        /// Save images to disk instead of uploading them (default ~/Pictures/panel-capture)
        #[arg(short, long, value_name = "DIR", num_args = 0..=1)]
        output: Option<Option<PathBuf>>,

        /// Backend environment (overrides the configured one)
        #[arg(long, value_enum)]
        env: Option<Environment>,
    },

    /// Show the configuration file location and effective settings
    Config {
        /// Write the effective configuration to disk
        #[arg(long)]
        save: bool,
    },

    /// Look up a PPID on the backend
    Check {
        #[arg(long)]
        ppid: String,

        #[arg(long, value_enum)]
        env: Option<Environment>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set RUST_LOG to override, e.g. RUST_LOG=panel_capture=debug
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Commands::List { synthetic } => cli::list_cameras(synthetic),
        Commands::Capture {
            ppid,
            mode,
            camera,
            synthetic,
            output,
            env,
        } => cli::capture(cli::CaptureArgs {
            ppid,
            mode,
            camera,
            synthetic,
            output: output.map(|dir| dir.unwrap_or_else(panel_capture::storage::default_output_dir)),
            env,
        }),
        Commands::Config { save } => cli::show_config(save),
        Commands::Check { ppid, env } => cli::check_ppid(&ppid, env),
    }
}
