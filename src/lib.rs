//! d2v-indexer library
//!
//! Builds D2V seek indexes for MPEG-1/2 video: pictures are classified and
//! grouped into GOP lines, keyframe positions are checked for reachability
//! by byte seeking, audio delays are measured against the first keyframe,
//! and the result is written in the D2V text format.

pub mod adapters;
pub mod cli;
pub mod config_initialization;
pub mod domain;
pub mod engine;
pub mod error;
pub mod index;
pub mod output;
pub mod ports;
pub mod streams;
pub mod utils;

// Re-export commonly used types
pub use domain::errors::SkipReason;
pub use domain::model::{AudioDelay, AudioDelayMap, JobOutcome, Line, Picture, PictureDescriptor};
pub use engine::{CancellationToken, IndexJob, JobConfig, JobReport};
pub use error::{D2vError, D2vResult};
pub use index::D2vIndex;
