//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;

use crate::domain::model::ColourRange;
use crate::utils::parse_hex_id;

/// Which audio tracks get their delay measured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSelection {
    All,
    Ids(Vec<i32>),
}

impl AudioSelection {
    /// `all`, or comma separated hex ids
    pub fn parse(value: &str) -> Result<Self, String> {
        if value.trim().eq_ignore_ascii_case("all") {
            return Ok(AudioSelection::All);
        }
        value
            .split(',')
            .map(|id| parse_hex_id(id).ok_or_else(|| format!("Invalid track id '{}'", id.trim())))
            .collect::<Result<Vec<_>, _>>()
            .map(AudioSelection::Ids)
    }

    pub fn ids(&self) -> Option<&[i32]> {
        match self {
            AudioSelection::All => None,
            AudioSelection::Ids(ids) => Some(ids),
        }
    }
}

fn parse_video_id(value: &str) -> Result<i32, String> {
    parse_hex_id(value).ok_or_else(|| format!("Invalid track id '{}'", value))
}

/// Arguments for the index command
#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Input files, read back to back as one stream
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output D2V file, `-` for stdout (default: <first input>.d2v)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Video track id in hex (default: first video track)
    #[arg(long, value_parser = parse_video_id)]
    pub video_id: Option<i32>,

    /// Audio track ids in hex, comma separated, or `all`
    #[arg(long, default_value = "all", value_parser = AudioSelection::parse)]
    pub audio_ids: AudioSelection,

    /// Luma range of the input (limited, full)
    #[arg(long, value_parser = crate::cli::parse_colour_range)]
    pub input_range: Option<ColourRange>,

    /// Skip keyframe reachability verification
    #[arg(long)]
    pub no_verify: bool,

    /// Write input names relative to the D2V file
    #[arg(long)]
    pub relative_paths: bool,
}

/// Arguments for the info command
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Input files, read back to back as one stream
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// D2V file to summarise
    pub d2v: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
