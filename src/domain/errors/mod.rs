// Domain errors - Recoverable anomalies raised while aggregating pictures

use std::fmt;

/// Why a picture descriptor was dropped instead of being indexed.
///
/// None of these abort a job: the aggregator reports the reason, the
/// picture is discarded and aggregation continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Coded width or height is zero or negative
    InvalidDimensions { width: i32, height: i32 },
    /// Picture coding type is not I, P or B
    UnknownPictureType(u8),
    /// Stream starts in the middle of a GOP
    LeadingNonKeyframe,
    /// B picture right after the first keyframe of an open GOP
    LeadingBPicture,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InvalidDimensions { width, height } => write!(
                f,
                "Skipping picture with invalid dimensions {}x{}",
                width, height
            ),
            SkipReason::UnknownPictureType(code) => {
                write!(f, "Skipping picture of unknown coding type {}", code)
            }
            SkipReason::LeadingNonKeyframe => {
                write!(f, "Skipping leading picture that is not a keyframe")
            }
            SkipReason::LeadingBPicture => {
                write!(f, "Skipping probably undecodable leading B picture")
            }
        }
    }
}

impl std::error::Error for SkipReason {}
