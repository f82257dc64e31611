// Domain models - Core types and data structures

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Rational number used for time bases, frame rates and aspect ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Both terms strictly positive
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Reduce `num/den` to the closest fraction whose terms do not exceed `max`.
    ///
    /// Follows the continued fraction expansion used by libavutil's
    /// `av_reduce`. The boolean is true when the result is exact.
    pub fn reduce(num: i64, den: i64, max: i64) -> (Rational, bool) {
        let negative = (num < 0) ^ (den < 0);
        let mut num = num.unsigned_abs() as i64;
        let mut den = den.unsigned_abs() as i64;

        let divisor = gcd(num, den);
        if divisor != 0 {
            num /= divisor;
            den /= divisor;
        }

        let (mut a0_num, mut a0_den) = (0i64, 1i64);
        let (mut a1_num, mut a1_den) = (1i64, 0i64);

        if num <= max && den <= max {
            a1_num = num;
            a1_den = den;
            den = 0;
        }

        while den != 0 {
            let mut x = num / den;
            let next_den = num - den * x;
            let a2_num = x * a1_num + a0_num;
            let a2_den = x * a1_den + a0_den;

            if a2_num > max || a2_den > max {
                if a1_num != 0 {
                    x = (max - a0_num) / a1_num;
                }
                if a1_den != 0 {
                    x = x.min((max - a0_den) / a1_den);
                }
                if den as i128 * (2 * x as i128 * a1_den as i128 + a0_den as i128)
                    > num as i128 * a1_den as i128
                {
                    a1_num = x * a1_num + a0_num;
                    a1_den = x * a1_den + a0_den;
                }
                break;
            }

            a0_num = a1_num;
            a0_den = a1_den;
            a1_num = a2_num;
            a1_den = a2_den;
            num = den;
            den = next_den;
        }

        let num = if negative { -a1_num } else { a1_num };
        (Rational::new(num as i32, a1_den as i32), den == 0)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Picture coding type as signalled in the picture header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingType {
    I,
    P,
    B,
    /// Anything else (MPEG-1 D pictures, reserved values)
    Unknown(u8),
}

impl CodingType {
    /// Map the 3-bit `picture_coding_type` of an MPEG-1/2 picture header
    pub fn from_mpeg_code(code: u8) -> Self {
        match code {
            1 => CodingType::I,
            2 => CodingType::P,
            3 => CodingType::B,
            other => CodingType::Unknown(other),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, CodingType::I | CodingType::P)
    }
}

impl fmt::Display for CodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodingType::I => write!(f, "I"),
            CodingType::P => write!(f, "P"),
            CodingType::B => write!(f, "B"),
            CodingType::Unknown(code) => write!(f, "?({})", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureStructure {
    TopField,
    BottomField,
    Frame,
}

impl PictureStructure {
    /// Map the 2-bit `picture_structure` of a picture coding extension
    pub fn from_mpeg_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PictureStructure::TopField),
            2 => Some(PictureStructure::BottomField),
            3 => Some(PictureStructure::Frame),
            _ => None,
        }
    }

    pub fn is_field(&self) -> bool {
        !matches!(self, PictureStructure::Frame)
    }
}

/// Codec family of the indexed video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecFamily {
    Mpeg1,
    Mpeg2,
    H264,
}

impl CodecFamily {
    /// Map a libavcodec codec name
    pub fn from_codec_name(name: &str) -> Option<Self> {
        match name {
            "mpeg1video" => Some(CodecFamily::Mpeg1),
            "mpeg2video" => Some(CodecFamily::Mpeg2),
            "h264" => Some(CodecFamily::H264),
            _ => None,
        }
    }

    pub fn is_mpeg12(&self) -> bool {
        matches!(self, CodecFamily::Mpeg1 | CodecFamily::Mpeg2)
    }

    pub fn mpeg_type(&self) -> MpegType {
        match self {
            CodecFamily::Mpeg1 => MpegType::Mpeg1,
            CodecFamily::Mpeg2 => MpegType::Mpeg2,
            CodecFamily::H264 => MpegType::H264,
        }
    }
}

/// One coded picture, as classified by the packet source, in decode order
#[derive(Debug, Clone, PartialEq)]
pub struct PictureDescriptor {
    pub coding_type: CodingType,
    /// Logical span offset where the access unit begins
    pub byte_position: i64,
    pub is_keyframe: bool,
    pub closed_gop: bool,
    pub progressive_sequence: bool,
    pub progressive_frame: bool,
    pub top_field_first: bool,
    /// 1 for a single display, 2 when a field is repeated, 3 for frame
    /// doubling and 5 for frame tripling
    pub repeat_field_count: u8,
    pub picture_structure: PictureStructure,
    pub decode_order_number: Option<i64>,
    pub colour_matrix: Option<u8>,
    pub width: i32,
    pub height: i32,
    pub pts: Option<i64>,
    pub time_base: Rational,
}

impl PictureDescriptor {
    /// A 720x480 frame picture with no optional signalling set
    pub fn new(coding_type: CodingType, byte_position: i64) -> Self {
        Self {
            coding_type,
            byte_position,
            is_keyframe: false,
            closed_gop: false,
            progressive_sequence: false,
            progressive_frame: false,
            top_field_first: false,
            repeat_field_count: 1,
            picture_structure: PictureStructure::Frame,
            decode_order_number: None,
            colour_matrix: None,
            width: 720,
            height: 480,
            pts: None,
            time_base: Rational::new(1, 90000),
        }
    }

    /// Keyframe I picture
    pub fn keyframe(byte_position: i64) -> Self {
        Self {
            is_keyframe: true,
            ..Self::new(CodingType::I, byte_position)
        }
    }

    pub fn with_closed_gop(mut self, closed: bool) -> Self {
        self.closed_gop = closed;
        self
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dimensions(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_repeat(mut self, repeat_field_count: u8) -> Self {
        self.repeat_field_count = repeat_field_count;
        self
    }

    pub fn with_structure(mut self, structure: PictureStructure) -> Self {
        self.picture_structure = structure;
        self
    }

    pub fn with_decode_order(mut self, number: i64) -> Self {
        self.decode_order_number = Some(number);
        self
    }
}

/// Bits of the per-picture flag byte
pub mod picture_flags {
    pub const DECODABLE_WITHOUT_PREVIOUS_GOP: u8 = 1 << 7;
    pub const PROGRESSIVE: u8 = 1 << 6;
    pub const P: u8 = 1 << 5;
    pub const I: u8 = 1 << 4;
    pub const B: u8 = 3 << 4;
    pub const TYPE_MASK: u8 = 3 << 4;
    pub const TFF: u8 = 1 << 1;
    pub const RFF: u8 = 1;
}

/// Bits of the per-line info field
pub mod line_info {
    /// Legacy marker, set on every emitted line
    pub const BIT11: u16 = 1 << 11;
    pub const CLOSED_GOP: u16 = 1 << 10;
    pub const PROGRESSIVE_SEQUENCE: u16 = 1 << 9;
    pub const STARTS_NEW_GOP: u16 = 1 << 8;
}

/// Standard colour matrix codes (ISO/IEC 23001-8)
pub mod matrix {
    pub const BT709: u8 = 1;
    pub const UNSPECIFIED: u8 = 2;
    pub const RESERVED: u8 = 3;
    pub const BT470BG: u8 = 5;
}

/// One indexed picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Picture {
    pub flags: u8,
    pub decode_order_number: Option<i64>,
    pub picture_structure: PictureStructure,
}

impl Picture {
    pub fn new(flags: u8) -> Self {
        Self {
            flags,
            decode_order_number: None,
            picture_structure: PictureStructure::Frame,
        }
    }

    fn has(&self, bits: u8) -> bool {
        self.flags & bits == bits
    }

    pub fn is_b(&self) -> bool {
        self.flags & picture_flags::TYPE_MASK == picture_flags::B
    }

    pub fn is_reference(&self) -> bool {
        let kind = self.flags & picture_flags::TYPE_MASK;
        kind == picture_flags::I || kind == picture_flags::P
    }

    pub fn is_decodable_without_previous_gop(&self) -> bool {
        self.has(picture_flags::DECODABLE_WITHOUT_PREVIOUS_GOP)
    }

    pub fn is_progressive(&self) -> bool {
        self.has(picture_flags::PROGRESSIVE)
    }

    pub fn is_top_field_first(&self) -> bool {
        self.has(picture_flags::TFF)
    }

    pub fn repeats_field(&self) -> bool {
        self.has(picture_flags::RFF)
    }
}

/// Index record for one GOP
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub info: u16,
    pub matrix: u8,
    pub file_index: i32,
    pub byte_position: i64,
    pub skip: i32,
    pub vob: i32,
    pub cell: i32,
    pub pictures: Vec<Picture>,
}

impl Line {
    /// Fresh line for a GOP starting at `byte_position`
    pub fn open(info: u16, matrix: u8, byte_position: i64) -> Self {
        Self {
            info,
            matrix,
            file_index: 0,
            byte_position,
            skip: 0,
            vob: 0,
            cell: 0,
            pictures: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.pictures.is_empty() || self.info & line_info::BIT11 == 0
    }

    pub fn is_closed_gop(&self) -> bool {
        self.info & line_info::CLOSED_GOP != 0
    }

    pub fn is_progressive_sequence(&self) -> bool {
        self.info & line_info::PROGRESSIVE_SEQUENCE != 0
    }
}

/// Frame statistics gathered from a finished line list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub video_frames: u64,
    pub progressive_frames: u64,
    pub tff_frames: u64,
    pub rff_frames: u64,
}

impl Stats {
    pub fn from_lines(lines: &[Line]) -> Self {
        let mut stats = Stats::default();
        for picture in lines.iter().flat_map(|line| line.pictures.iter()) {
            stats.video_frames += 1;
            if picture.is_progressive() {
                stats.progressive_frames += 1;
            }
            if picture.is_top_field_first() {
                stats.tff_frames += 1;
            }
            if picture.repeats_field() {
                stats.rff_frames += 1;
            }
        }
        stats
    }
}

/// Container family, as written in the `Stream_Type` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamType {
    Elementary,
    Program,
    Transport,
    Pva,
    Unknown,
}

impl StreamType {
    /// Map a libavformat demuxer name
    pub fn from_format_name(name: &str) -> Self {
        match name {
            "mpegvideo" | "h264" => StreamType::Elementary,
            "mpeg" => StreamType::Program,
            "mpegts" => StreamType::Transport,
            "pva" => StreamType::Pva,
            _ => StreamType::Unknown,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            StreamType::Elementary => 0,
            StreamType::Program => 1,
            StreamType::Transport => 2,
            StreamType::Pva => 3,
            StreamType::Unknown => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MpegType {
    Mpeg1,
    Mpeg2,
    H264,
}

impl MpegType {
    pub fn code(&self) -> i32 {
        match self {
            MpegType::Mpeg1 => 1,
            MpegType::Mpeg2 => 2,
            MpegType::H264 => 264,
        }
    }
}

/// Luma range of the decoded output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColourRange {
    #[default]
    Limited,
    Full,
}

impl ColourRange {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "limited" | "tv" | "mpeg" => Some(ColourRange::Limited),
            "full" | "pc" | "jpeg" => Some(ColourRange::Full),
            _ => None,
        }
    }

    /// Value of the `YUVRGB_Scale` setting
    pub fn yuvrgb_scale(&self) -> i32 {
        match self {
            ColourRange::Limited => 1,
            ColourRange::Full => 0,
        }
    }
}

/// Everything the settings block of a D2V file needs
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub stream_type: StreamType,
    pub mpeg_type: MpegType,
    /// Video and audio PIDs, transport streams only
    pub transport_pids: Option<(i32, i32)>,
    pub transport_packet_size: Option<i32>,
    pub colour_range: ColourRange,
    pub aspect_ratio: Rational,
    pub width: i32,
    pub height: i32,
    pub frame_rate: Rational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

/// Stream description reported by a packet source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub id: i32,
    pub kind: StreamKind,
    pub codec_name: String,
    pub width: i32,
    pub height: i32,
    pub sample_aspect_ratio: Rational,
    /// `0/1` when the container does not know it
    pub frame_rate: Rational,
    pub time_base: Rational,
    pub channel_layout: Option<String>,
    pub bit_rate: Option<i64>,
    pub colour_range: Option<ColourRange>,
}

impl StreamInfo {
    pub fn video(id: i32, codec_name: &str, width: i32, height: i32) -> Self {
        Self {
            id,
            kind: StreamKind::Video,
            codec_name: codec_name.to_string(),
            width,
            height,
            sample_aspect_ratio: Rational::new(1, 1),
            frame_rate: Rational::default(),
            time_base: Rational::new(1, 90000),
            channel_layout: None,
            bit_rate: None,
            colour_range: None,
        }
    }

    pub fn audio(id: i32, codec_name: &str) -> Self {
        Self {
            id,
            kind: StreamKind::Audio,
            codec_name: codec_name.to_string(),
            width: 0,
            height: 0,
            sample_aspect_ratio: Rational::default(),
            frame_rate: Rational::default(),
            time_base: Rational::new(1, 90000),
            channel_layout: None,
            bit_rate: None,
            colour_range: None,
        }
    }
}

/// Container description reported by a packet source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerInfo {
    /// libavformat demuxer name ("mpegvideo", "mpeg", "mpegts", "pva")
    pub format_name: String,
    pub transport_packet_size: Option<i32>,
    pub streams: Vec<StreamInfo>,
}

impl ContainerInfo {
    pub fn stream(&self, id: i32) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.id == id)
    }

    pub fn video_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Video)
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Audio)
    }

    pub fn stream_type(&self) -> StreamType {
        StreamType::from_format_name(&self.format_name)
    }
}

/// Presentation delay of one audio stream relative to the first keyframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioDelay {
    /// Milliseconds, negative when the audio starts first
    Known(i64),
    Unknown,
}

impl AudioDelay {
    pub fn millis(&self) -> Option<i64> {
        match self {
            AudioDelay::Known(ms) => Some(*ms),
            AudioDelay::Unknown => None,
        }
    }
}

/// Audio stream id to delay
pub type AudioDelayMap = BTreeMap<i32, AudioDelay>;

/// Terminal result of an indexing job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Finished,
    Cancelled,
    Error(String),
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Finished => write!(f, "finished"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
            JobOutcome::Error(message) => write!(f, "error: {}", message),
        }
    }
}
