//! Audio stream handling: delay measurement and output naming

pub mod audio_delay;
pub mod naming;

pub use audio_delay::AudioDelayCalculator;
pub use naming::{suggest_audio_track_suffix, suggest_d2v_name};
