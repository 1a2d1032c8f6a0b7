//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{INFRA_ENV_VAR, SETTINGS_ENV_VAR};

/// Ferraform - declarative infrastructure for DigitalOcean and Vultr.
#[derive(Parser, Debug)]
#[command(name = "ferraform")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the infrastructure file.
    #[arg(short, long, global = true, env = INFRA_ENV_VAR)]
    pub infra: Option<PathBuf>,

    /// Path to the settings file.
    #[arg(short, long, global = true, env = SETTINGS_ENV_VAR)]
    pub settings: Option<PathBuf>,

    /// Path to the local state file, overriding the settings.
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Default provider, overriding the settings.
    #[arg(short, long, global = true)]
    pub provider: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

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
    /// Show what a deploy or destroy would change.
    Plan {
        /// Preview a destroy instead of a deploy.
        #[arg(long)]
        destroy: bool,
    },

    /// Create and update resources to match the infrastructure file.
    Deploy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Destroy every recorded resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Validate the infrastructure and settings files.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Inspect or repair the recorded state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show recorded resources and recent history.
    Show,

    /// Release a leftover state lock.
    Unlock {
        /// Lock ID to release.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
