// LibAV adapter - Program, transport and PVA demuxing through libavformat

use std::os::raw::{c_char, c_int, c_void};
use std::path::{Path, PathBuf};
use std::ptr;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use ffmpeg_next::format::context::Input;
use ffmpeg_next::media::Type;
use tracing::{debug, info, warn};

use crate::adapters::mpeg_es::headers::Mpeg12HeaderParser;
use crate::domain::model::*;
use crate::error::{D2vError, D2vResult};
use crate::ports::{AudioPacket, Packet, PacketSource, VideoPacket};

/// Packet size of a plain MPEG transport stream
pub const DEFAULT_TS_PACKET_SIZE: i32 = 188;

/// libavformat URL reading the inputs back to back
pub fn concat_url<P: AsRef<Path>>(paths: &[P]) -> String {
    if paths.len() == 1 {
        return paths[0].as_ref().to_string_lossy().into_owned();
    }
    let joined = paths
        .iter()
        .map(|p| p.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("|");
    format!("concat:{}", joined)
}

/// `Transport_Packet_Size` for a container, from the demuxer's
/// `ts_packetsize` option when it exports one
pub fn transport_packet_size(format_name: &str, ts_packetsize: Option<i64>) -> Option<i32> {
    if format_name != "mpegts" {
        return None;
    }
    let size = ts_packetsize
        .filter(|size| *size > 0)
        .and_then(|size| i32::try_from(size).ok())
        .unwrap_or(DEFAULT_TS_PACKET_SIZE);
    Some(size)
}

/// Read the mpegts demuxer's detected packet size (188, 192 or 204)
fn read_ts_packetsize(input: &mut Input) -> Option<i64> {
    let mut value: i64 = 0;
    // SAFETY: the format context is owned by `input`, the option name is
    // NUL terminated and `value` outlives the call.
    let ret = unsafe {
        ffi::av_opt_get_int(
            input.as_mut_ptr() as *mut c_void,
            b"ts_packetsize\0".as_ptr() as *const c_char,
            ffi::AV_OPT_SEARCH_CHILDREN as c_int,
            &mut value,
        )
    };
    (ret >= 0).then_some(value)
}

fn convert_rational(value: ffmpeg::Rational) -> Rational {
    Rational::new(value.numerator(), value.denominator())
}

fn h264_coding_type(pict_type: c_int) -> CodingType {
    use ffi::AVPictureType::*;
    match pict_type {
        t if t == AV_PICTURE_TYPE_I as c_int => CodingType::I,
        t if t == AV_PICTURE_TYPE_P as c_int => CodingType::P,
        t if t == AV_PICTURE_TYPE_B as c_int => CodingType::B,
        other => CodingType::Unknown(other.clamp(0, u8::MAX as c_int) as u8),
    }
}

/// What libavcodec's H.264 parser reports for one access unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedH264 {
    pub coding_type: CodingType,
    pub key_frame: bool,
    pub structure: PictureStructure,
    pub top_field_first: bool,
    pub progressive: bool,
    /// Extra display fields as counted by libavcodec (0, 1, 2 or 4)
    pub repeat_pict: i32,
    pub output_picture_number: i32,
    pub width: i32,
    pub height: i32,
    pub pts: Option<i64>,
}

impl ParsedH264 {
    fn from_parser(parser: &ffi::AVCodecParserContext) -> Self {
        use ffi::AVFieldOrder::*;
        use ffi::AVPictureStructure::*;

        let structure = match parser.picture_structure {
            AV_PICTURE_STRUCTURE_TOP_FIELD => PictureStructure::TopField,
            AV_PICTURE_STRUCTURE_BOTTOM_FIELD => PictureStructure::BottomField,
            _ => PictureStructure::Frame,
        };

        Self {
            coding_type: h264_coding_type(parser.pict_type),
            key_frame: parser.key_frame != 0,
            structure,
            top_field_first: matches!(parser.field_order, AV_FIELD_TT),
            progressive: matches!(parser.field_order, AV_FIELD_PROGRESSIVE),
            repeat_pict: parser.repeat_pict,
            output_picture_number: parser.output_picture_number,
            width: parser.width,
            height: parser.height,
            pts: (parser.pts != ffi::AV_NOPTS_VALUE).then_some(parser.pts),
        }
    }

    /// Picture descriptor for the access unit starting at `position`.
    ///
    /// Only frame doubling and tripling set the repeat flag; a single
    /// repeated field does not.
    pub fn into_descriptor(
        self,
        position: i64,
        time_base: Rational,
        colour_matrix: Option<u8>,
    ) -> PictureDescriptor {
        PictureDescriptor {
            coding_type: self.coding_type,
            byte_position: position,
            is_keyframe: self.key_frame,
            closed_gop: false,
            progressive_sequence: false,
            progressive_frame: self.progressive,
            top_field_first: self.top_field_first,
            repeat_field_count: self.repeat_pict.clamp(1, 4) as u8,
            picture_structure: self.structure,
            decode_order_number: Some(self.output_picture_number as i64),
            colour_matrix,
            width: self.width,
            height: self.height,
            pts: self.pts,
            time_base,
        }
    }
}

/// libavcodec H.264 parser bound to one video stream
struct H264Parser {
    parser: *mut ffi::AVCodecParserContext,
    codec: ffmpeg::codec::context::Context,
    colour_matrix: Option<u8>,
}

// SAFETY: the parser context is owned by this value and only touched through
// `&mut self`.
unsafe impl Send for H264Parser {}

impl H264Parser {
    fn new(parameters: ffmpeg::codec::Parameters, colour_matrix: Option<u8>) -> D2vResult<Self> {
        let codec = ffmpeg::codec::context::Context::from_parameters(parameters)?;
        Ok(Self {
            parser: Self::init_parser()?,
            codec,
            colour_matrix,
        })
    }

    fn init_parser() -> D2vResult<*mut ffi::AVCodecParserContext> {
        // SAFETY: plain constructor call; the result is checked for null.
        let parser = unsafe { ffi::av_parser_init(ffi::AVCodecID::AV_CODEC_ID_H264 as c_int) };
        if parser.is_null() {
            return Err(D2vError::DemuxError {
                message: "Couldn't initialise parser for h264".to_string(),
            });
        }
        // SAFETY: `parser` is non-null and exclusively ours.
        unsafe {
            (*parser).flags |= ffi::PARSER_FLAG_COMPLETE_FRAMES as c_int;
        }
        Ok(parser)
    }

    /// Drop parser state after the demuxer was repositioned
    fn reset(&mut self) -> D2vResult<()> {
        let fresh = Self::init_parser()?;
        // SAFETY: the old context came from `av_parser_init` and is replaced
        // right after being closed.
        unsafe { ffi::av_parser_close(self.parser) };
        self.parser = fresh;
        Ok(())
    }

    /// Feed one demuxed packet; `None` until the parser has a whole frame
    fn parse(&mut self, data: &[u8], pts: Option<i64>, dts: Option<i64>, position: i64) -> Option<ParsedH264> {
        let mut remaining = data;
        let mut produced = false;

        while !remaining.is_empty() {
            let mut out: *mut u8 = ptr::null_mut();
            let mut out_size: c_int = 0;
            // SAFETY: `remaining` is a live slice for the duration of the
            // call and both contexts are owned by `self`.
            let consumed = unsafe {
                ffi::av_parser_parse2(
                    self.parser,
                    self.codec.as_mut_ptr(),
                    &mut out,
                    &mut out_size,
                    remaining.as_ptr(),
                    remaining.len() as c_int,
                    pts.unwrap_or(ffi::AV_NOPTS_VALUE),
                    dts.unwrap_or(ffi::AV_NOPTS_VALUE),
                    position,
                )
            };
            if consumed <= 0 {
                break;
            }
            produced |= out_size > 0;
            remaining = &remaining[(consumed as usize).min(remaining.len())..];
        }

        if !produced {
            return None;
        }
        // SAFETY: non-null since construction; read after the last parse call.
        Some(ParsedH264::from_parser(unsafe { &*self.parser }))
    }
}

impl Drop for H264Parser {
    fn drop(&mut self) {
        // SAFETY: allocated by `av_parser_init` and closed exactly once.
        unsafe { ffi::av_parser_close(self.parser) };
    }
}

/// Per-stream picture classification
enum VideoParser {
    Mpeg12(Mpeg12HeaderParser),
    H264(H264Parser),
    Unclassified,
}

impl VideoParser {
    fn reset(&mut self) -> D2vResult<()> {
        match self {
            VideoParser::Mpeg12(parser) => *parser = Mpeg12HeaderParser::new(),
            VideoParser::H264(parser) => parser.reset()?,
            VideoParser::Unclassified => {}
        }
        Ok(())
    }
}

/// Packet source backed by libavformat.
///
/// Stream ids are the container ids (PID for transport streams, stream id
/// for program streams). MPEG-1/2 pictures are classified from their
/// headers, H.264 ones through libavcodec's parser; other video codecs are
/// listed but report no codec family.
pub struct LibavSource {
    url: String,
    input: Input,
    container: ContainerInfo,
    span_size: i64,
    /// Container stream id per libavformat stream index
    stream_ids: Vec<i32>,
    kinds: Vec<StreamKind>,
    time_bases: Vec<Rational>,
    parsers: Vec<VideoParser>,
}

impl LibavSource {
    pub fn open<P: AsRef<Path>>(paths: &[P], span_size: u64) -> D2vResult<Self> {
        ffmpeg::init()?;

        let url = concat_url(paths);
        let mut input = ffmpeg::format::input(&PathBuf::from(&url)).map_err(|e| D2vError::DemuxError {
            message: format!("Failed to open '{}': {}", url, e),
        })?;

        let format_name = input.format().name().to_string();
        let mut streams = Vec::new();
        let mut stream_ids = Vec::new();
        let mut kinds = Vec::new();
        let mut time_bases = Vec::new();
        let mut parsers = Vec::new();

        for stream in input.streams() {
            let parameters = stream.parameters();
            let codec_name = parameters.id().name().to_string();
            let time_base = convert_rational(stream.time_base());
            let id = stream.id();
            let mut parser = VideoParser::Unclassified;

            let info = match parameters.medium() {
                Type::Video => {
                    let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
                        .decoder()
                        .video()?;
                    let colour_space = ffi::AVColorSpace::from(decoder.color_space()) as i32;
                    let colour_matrix = u8::try_from(colour_space).ok();

                    parser = match CodecFamily::from_codec_name(&codec_name) {
                        Some(CodecFamily::H264) => {
                            VideoParser::H264(H264Parser::new(stream.parameters(), colour_matrix)?)
                        }
                        Some(_) => VideoParser::Mpeg12(Mpeg12HeaderParser::new()),
                        None => VideoParser::Unclassified,
                    };

                    let mut info =
                        StreamInfo::video(id, &codec_name, decoder.width() as i32, decoder.height() as i32);
                    info.sample_aspect_ratio = convert_rational(decoder.aspect_ratio());
                    info.frame_rate = convert_rational(stream.avg_frame_rate());
                    info.time_base = time_base;
                    info
                }
                Type::Audio => {
                    let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
                        .decoder()
                        .audio()?;
                    let mut info = StreamInfo::audio(id, &codec_name);
                    info.time_base = time_base;
                    info.bit_rate = Some(decoder.bit_rate() as i64).filter(|rate| *rate > 0);
                    info
                }
                _ => {
                    let mut info = StreamInfo::audio(id, &codec_name);
                    info.kind = StreamKind::Other;
                    info.time_base = time_base;
                    info
                }
            };

            stream_ids.push(id);
            kinds.push(info.kind);
            time_bases.push(time_base);
            parsers.push(parser);
            streams.push(info);
        }

        let ts_packetsize = if format_name == "mpegts" {
            read_ts_packetsize(&mut input)
        } else {
            None
        };
        let container = ContainerInfo {
            transport_packet_size: transport_packet_size(&format_name, ts_packetsize),
            format_name,
            streams,
        };

        info!(
            format = %container.format_name,
            streams = container.streams.len(),
            ts_packet_size = ?container.transport_packet_size,
            "Opened container through libavformat"
        );

        Ok(Self {
            url,
            input,
            container,
            span_size: span_size as i64,
            stream_ids,
            kinds,
            time_bases,
            parsers,
        })
    }

    fn reopen(&mut self) -> D2vResult<()> {
        self.input = ffmpeg::format::input(&PathBuf::from(&self.url)).map_err(|e| D2vError::DemuxError {
            message: format!("Failed to reopen '{}': {}", self.url, e),
        })?;
        Ok(())
    }
}

impl PacketSource for LibavSource {
    fn container(&self) -> &ContainerInfo {
        &self.container
    }

    fn codec_family(&self, video_stream_id: i32) -> Option<CodecFamily> {
        self.container
            .stream(video_stream_id)
            .and_then(|s| CodecFamily::from_codec_name(&s.codec_name))
    }

    fn span_size(&self) -> i64 {
        self.span_size
    }

    fn open_at(&mut self, offset: i64) -> D2vResult<()> {
        for parser in &mut self.parsers {
            parser.reset()?;
        }

        if offset <= 0 {
            return self.reopen();
        }

        // SAFETY: the context pointer is owned by `self.input` and stays
        // valid for the duration of the call.
        let ret = unsafe {
            ffi::av_seek_frame(
                self.input.as_mut_ptr(),
                -1,
                offset,
                ffi::AVSEEK_FLAG_BYTE as c_int,
            )
        };
        if ret < 0 {
            return Err(D2vError::DemuxError {
                message: format!("Byte seek to {} failed: {}", offset, ffmpeg::Error::from(ret)),
            });
        }
        debug!(offset, "Seeked container by bytes");
        Ok(())
    }

    fn next_packet(&mut self) -> D2vResult<Option<Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(e) => {
                return Err(D2vError::DemuxError {
                    message: format!("Failed to read packet: {}", e),
                })
            }
        }

        let index = packet.stream();
        let Some(&stream_id) = self.stream_ids.get(index) else {
            warn!(index, "Packet for unknown stream index");
            return Ok(Some(Packet::Other {
                stream_id: -1,
                position: packet.position() as i64,
            }));
        };
        let position = packet.position() as i64;
        let time_base = self.time_bases[index];

        let result = match self.kinds[index] {
            StreamKind::Video => {
                let picture = match (&mut self.parsers[index], packet.data()) {
                    (VideoParser::Mpeg12(parser), Some(data)) => {
                        parser.parse_access_unit(data);
                        parser.describe(position).map(|mut picture| {
                            picture.pts = packet.pts();
                            picture.time_base = time_base;
                            picture
                        })
                    }
                    (VideoParser::H264(parser), Some(data)) => parser
                        .parse(data, packet.pts(), packet.dts(), position)
                        .map(|parsed| parsed.into_descriptor(position, time_base, parser.colour_matrix)),
                    _ => None,
                };
                Packet::Video(VideoPacket {
                    stream_id,
                    position,
                    picture,
                })
            }
            StreamKind::Audio => Packet::Audio(AudioPacket {
                stream_id,
                position,
                pts: packet.pts(),
                time_base,
            }),
            StreamKind::Other => Packet::Other { stream_id, position },
        };
        Ok(Some(result))
    }
}
