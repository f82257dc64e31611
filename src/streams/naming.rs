//! Suggested output file names

use std::path::{Path, PathBuf};

use crate::domain::model::{AudioDelay, AudioDelayMap, StreamInfo};

/// LPCM is stored in Wave64 rather than a raw elementary stream
pub fn requires_wave64(codec_name: &str) -> bool {
    matches!(codec_name, "pcm_dvd" | "pcm_bluray")
}

pub fn suggest_audio_file_extension(codec_name: &str) -> &str {
    if requires_wave64(codec_name) {
        "w64"
    } else {
        codec_name
    }
}

/// `<input>.d2v`, next to the first input file
pub fn suggest_d2v_name<P: AsRef<Path>>(first_input: P) -> PathBuf {
    let mut name = first_input.as_ref().as_os_str().to_os_string();
    name.push(".d2v");
    PathBuf::from(name)
}

/// ` T<id>[ <layout>][ <kbps> kbps][ DELAY <ms>ms].<ext>`
pub fn suggest_audio_track_suffix(stream: &StreamInfo, delays: &AudioDelayMap) -> String {
    let mut suffix = format!(" T{:x}", stream.id);

    if let Some(layout) = stream.channel_layout.as_deref().filter(|l| !l.is_empty()) {
        suffix.push(' ');
        suffix.push_str(layout);
    }

    if let Some(bit_rate) = stream.bit_rate.filter(|&b| b > 0) {
        suffix.push_str(&format!(" {} kbps", bit_rate / 1000));
    }

    if let Some(AudioDelay::Known(ms)) = delays.get(&stream.id) {
        suffix.push_str(&format!(" DELAY {}ms", ms));
    }

    suffix.push('.');
    suffix.push_str(suggest_audio_file_extension(&stream.codec_name));
    suffix
}
