//! D2V text writer
//!
//! Field order and separators are read back by existing frame servers and
//! must not change.

use std::io::Write;

use tracing::debug;

use crate::domain::model::{CodecFamily, Line, StreamSettings, StreamType};
use crate::error::{D2vError, D2vResult};

/// Marker closing the last data line
pub const STREAM_END: &str = " ff\n";

/// `DGIndexProjectFile` version: 42 for H.264, 16 otherwise
pub fn header_version(family: CodecFamily) -> u32 {
    match family {
        CodecFamily::H264 => 42,
        CodecFamily::Mpeg1 | CodecFamily::Mpeg2 => 16,
    }
}

/// Integer part of `num * 1000 / den`, computed in single precision
pub fn frame_rate_millis(num: i32, den: i32) -> i32 {
    if den == 0 {
        return 0;
    }
    (num as f32 * 1000.0 / den as f32) as i32
}

pub fn format_header(version: u32, file_names: &[String]) -> String {
    let mut header = format!("DGIndexProjectFile{}\n{}\n", version, file_names.len());
    for name in file_names {
        header.push_str(name);
        header.push('\n');
    }
    header.push('\n');
    header
}

pub fn format_settings(settings: &StreamSettings) -> String {
    let mut out = String::new();

    out.push_str(&format!("Stream_Type={}\n", settings.stream_type.code()));
    if settings.stream_type == StreamType::Transport {
        let (video_pid, audio_pid) = settings.transport_pids.unwrap_or((0, 0));
        out.push_str(&format!(
            "MPEG2_Transport_PID={:x},{:x},{:x}\n",
            video_pid, audio_pid, 0
        ));
        out.push_str(&format!(
            "Transport_Packet_Size={}\n",
            settings.transport_packet_size.unwrap_or(0)
        ));
    }
    out.push_str(&format!("MPEG_Type={}\n", settings.mpeg_type.code()));
    out.push_str("iDCT_Algorithm=6\n");
    out.push_str(&format!("YUVRGB_Scale={}\n", settings.colour_range.yuvrgb_scale()));
    out.push_str("Luminance_Filter=0,0\n");
    out.push_str("Clipping=0,0,0,0\n");
    out.push_str(&format!(
        "Aspect_Ratio={}:{}\n",
        settings.aspect_ratio.num, settings.aspect_ratio.den
    ));
    out.push_str(&format!("Picture_Size={}x{}\n", settings.width, settings.height));
    out.push_str("Field_Operation=0\n");
    out.push_str(&format!(
        "Frame_Rate={} ({}/{})\n",
        frame_rate_millis(settings.frame_rate.num, settings.frame_rate.den),
        settings.frame_rate.num,
        settings.frame_rate.den
    ));
    out.push_str("Location=0,0,0,0\n");

    out
}

/// One data line, without the trailing newline
pub fn format_line(line: &Line) -> String {
    let mut out = format!(
        "\n{:x} {} {} {} {} {} {}",
        line.info, line.matrix, line.file_index, line.byte_position, line.skip, line.vob, line.cell
    );
    for picture in &line.pictures {
        out.push_str(&format!(" {:x}", picture.flags));
    }
    out
}

/// Whole document as a string
pub fn format_d2v(
    family: CodecFamily,
    file_names: &[String],
    settings: &StreamSettings,
    lines: &[Line],
) -> String {
    let mut out = format_header(header_version(family), file_names);
    out.push_str(&format_settings(settings));
    for line in lines {
        out.push_str(&format_line(line));
    }
    out.push_str(STREAM_END);
    out
}

/// Streams a D2V document section by section
pub struct D2vWriter<W: Write> {
    out: W,
    lines_written: usize,
}

impl<W: Write> D2vWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            lines_written: 0,
        }
    }

    fn emit(&mut self, text: &str, what: &str) -> D2vResult<()> {
        self.out
            .write_all(text.as_bytes())
            .map_err(|e| D2vError::output(format!("Failed to print d2v {}: {}", what, e)))
    }

    pub fn write_header(&mut self, family: CodecFamily, file_names: &[String]) -> D2vResult<()> {
        self.emit(&format_header(header_version(family), file_names), "header section")
    }

    pub fn write_settings(&mut self, settings: &StreamSettings) -> D2vResult<()> {
        self.emit(&format_settings(settings), "settings section")
    }

    pub fn write_line(&mut self, line: &Line) -> D2vResult<()> {
        self.emit(&format_line(line), "data line")?;
        self.lines_written += 1;
        Ok(())
    }

    pub fn write_stream_end(&mut self) -> D2vResult<()> {
        self.emit(STREAM_END, "stream end flag")?;
        self.out
            .flush()
            .map_err(|e| D2vError::output(format!("Failed to flush d2v file: {}", e)))?;
        debug!(lines = self.lines_written, "D2V stream end written");
        Ok(())
    }

    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
