// Adapters - Byte spans, packet sources and configuration storage

#[cfg(feature = "ffmpeg")]
pub mod libav;
pub mod mpeg_es;
pub mod multi_file;
pub mod toml_config;
pub mod tracing_log;

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

pub use mpeg_es::MpegEsSource;
pub use multi_file::{MultiFileSpan, SpanLayout};
pub use toml_config::TomlConfigAdapter;
pub use tracing_log::TracingProgressCallback;

use crate::error::{D2vError, D2vResult};
use crate::ports::PacketSource;
use mpeg_es::headers::{find_start_code, SEQUENCE_HEADER_CODE};

/// Bytes examined when guessing the container type
const SNIFF_SIZE: usize = 64;

/// What the first bytes of a span look like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffedFormat {
    /// Raw MPEG-1/2 video, starting with a sequence header
    MpegVideo,
    /// Anything else; needs libavformat
    Other,
}

/// Look at the first start code of the span
pub fn sniff_format<R: Read + Seek>(reader: &mut R) -> D2vResult<SniffedFormat> {
    reader.seek(SeekFrom::Start(0))?;
    let mut head = Vec::with_capacity(SNIFF_SIZE);
    reader.by_ref().take(SNIFF_SIZE as u64).read_to_end(&mut head)?;
    reader.seek(SeekFrom::Start(0))?;

    Ok(match find_start_code(&head) {
        Some((_, SEQUENCE_HEADER_CODE)) => SniffedFormat::MpegVideo,
        _ => SniffedFormat::Other,
    })
}

/// Open the inputs as one span and pick a packet source for it
pub fn open_packet_source<P: AsRef<Path>>(
    inputs: &[P],
) -> D2vResult<(Box<dyn PacketSource + Send>, SpanLayout)> {
    let mut span = MultiFileSpan::open(inputs)?;
    let layout = span.layout().clone();
    let format = sniff_format(&mut span)?;
    debug!(?format, files = layout.file_count(), "Sniffed input format");

    match format {
        SniffedFormat::MpegVideo => Ok((Box::new(MpegEsSource::open(span)?), layout)),
        SniffedFormat::Other => open_with_libav(inputs, layout),
    }
}

#[cfg(feature = "ffmpeg")]
fn open_with_libav<P: AsRef<Path>>(
    inputs: &[P],
    layout: SpanLayout,
) -> D2vResult<(Box<dyn PacketSource + Send>, SpanLayout)> {
    let source = libav::LibavSource::open(inputs, layout.total_size())?;
    Ok((Box::new(source), layout))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_with_libav<P: AsRef<Path>>(
    _inputs: &[P],
    _layout: SpanLayout,
) -> D2vResult<(Box<dyn PacketSource + Send>, SpanLayout)> {
    Err(D2vError::UnsupportedContainer {
        format: "unknown (built without ffmpeg support)".to_string(),
    })
}
