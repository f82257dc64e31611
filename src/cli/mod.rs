//! CLI module for d2vindex
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

use crate::config_initialization::{CliOverrides, ProgressMode};
use crate::domain::model::ColourRange;
use crate::utils::logging::LogLevel;

/// d2vindex
///
/// Builds D2V indexes for frame-accurate seeking in MPEG-1/2 video spread
/// over one or more files.
#[derive(Parser, Debug)]
#[command(name = "d2vindex")]
#[command(about = "Build D2V frame-accurate seek indexes for MPEG video")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "D2VINDEX_LOG_LEVEL", value_parser = parse_log_level)]
    pub log_level: Option<LogLevel>,

    /// Configuration file (default: ./d2vindex.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Progress reporting (console, json, log, none)
    #[arg(long, global = true, value_parser = parse_progress_mode)]
    pub progress: Option<ProgressMode>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index video files into a D2V file
    Index(args::IndexArgs),
    /// List the tracks of the input files
    Info(args::InfoArgs),
    /// Summarise an existing D2V file
    Inspect(args::InspectArgs),
}

impl Cli {
    /// Command-line layer of the configuration hierarchy
    pub fn overrides(&self) -> CliOverrides {
        let mut overrides = CliOverrides {
            config_file: self.config.clone(),
            log_level: self.log_level,
            progress: self.progress,
            quiet: self.quiet,
            ..CliOverrides::default()
        };

        if let Commands::Index(args) = &self.command {
            overrides.input_range = args.input_range;
            overrides.no_verify = args.no_verify;
            overrides.relative_paths = args.relative_paths;
        }

        overrides
    }
}

fn parse_log_level(value: &str) -> Result<LogLevel, String> {
    LogLevel::parse(value).map_err(|e| e.to_string())
}

fn parse_progress_mode(value: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(value).map_err(|e| e.to_string())
}

pub(crate) fn parse_colour_range(value: &str) -> Result<ColourRange, String> {
    ColourRange::parse(value).ok_or_else(|| format!("Invalid input range '{}'", value))
}
