//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Driftstack - declarative deployment stack orchestrator.
#[derive(Parser, Debug)]
#[command(name = "driftstack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the stack definition file.
    #[arg(short, long, global = true, env = "DRIFTSTACK_STACK")]
    pub stack: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stack project with a sample module registry.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the stack definition and its module registry.
    Validate,

    /// Resolve the module graph into a snapshot and display it.
    Resolve,

    /// Compute the plan against the stored stack record.
    Preview {
        /// Show per-field change details.
        #[arg(short, long)]
        detailed: bool,

        /// JSON file with a captured live-scope listing.
        #[arg(long)]
        live: Option<PathBuf>,
    },

    /// Manage stack state records.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the record for the current stack.
    Show,

    /// List all stack records in the state directory.
    List,

    /// Remove the record for the current stack.
    Rm {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

