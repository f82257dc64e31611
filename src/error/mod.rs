//! Error handling module for the D2V indexer

use thiserror::Error;

/// Main error type for indexing operations
#[derive(Error, Debug)]
pub enum D2vError {
    /// One of the input files could not be opened or measured
    #[error("Failed to open input span: {message}")]
    SpanError { message: String },

    /// Container demuxing failed
    #[error("Failed to demux input: {message}")]
    DemuxError { message: String },

    /// A packet of the given stream could not be decoded
    #[error("Failed to decode stream {stream_id:x}: {message}")]
    DecodeError { stream_id: i32, message: String },

    /// Container format the indexer cannot handle
    #[error("Unsupported container type '{format}'.")]
    UnsupportedContainer { format: String },

    /// Codec the indexer cannot handle
    #[error("Unsupported video codec '{codec}'.")]
    UnsupportedCodec { codec: String },

    /// Requested or implied video track is missing
    #[error("Couldn't find video track with id {stream_id:x}.")]
    VideoStreamNotFound { stream_id: i32 },

    /// Requested audio tracks are missing, one line per id
    #[error("{}", missing_audio_tracks(.stream_ids))]
    AudioStreamNotFound { stream_ids: Vec<i32> },

    /// No video track at all
    #[error("No video tracks detected.")]
    NoVideoStream,

    /// Output write error
    #[error("Failed to write D2V file: {message}")]
    OutputError { message: String },

    /// Malformed D2V document
    #[error("Failed to parse D2V file at line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// The job's cancellation token was triggered
    #[error("Indexing cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// FFmpeg error
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
}

impl D2vError {
    /// Shorthand for wrapping a write failure
    pub fn output(err: impl std::fmt::Display) -> Self {
        D2vError::OutputError {
            message: err.to_string(),
        }
    }
}

fn missing_audio_tracks(stream_ids: &[i32]) -> String {
    stream_ids
        .iter()
        .map(|id| format!("Couldn't find audio track with id {:x}.", id))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result type alias for indexing operations
pub type D2vResult<T> = std::result::Result<T, D2vError>;
