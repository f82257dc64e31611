// MPEG-1/2 elementary stream adapter - Pure Rust picture source for .m1v/.m2v files

pub mod headers;

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, info};

use crate::domain::model::*;
use crate::error::{D2vError, D2vResult};
use crate::ports::{ByteSpan, Packet, PacketSource, VideoPacket};

use headers::*;

/// Stream id libavformat gives the single stream of an elementary stream
pub const ES_VIDEO_STREAM_ID: i32 = 0;

/// How far into the span the probe looks for a sequence header
const PROBE_LIMIT: i64 = 4 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// A start code found in the span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCode {
    /// Span offset of the `00 00 01` prefix
    pub position: i64,
    pub code: u8,
    /// Up to `MAX_HEADER_PAYLOAD` bytes following the code
    pub payload: Vec<u8>,
}

/// Streaming start code scanner over a byte span
pub struct StartCodeScanner {
    buffer: Vec<u8>,
    /// Span offset of `buffer[0]`
    buffer_start: i64,
    cursor: usize,
    eof: bool,
}

impl StartCodeScanner {
    pub fn new(start: i64) -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK * 2),
            buffer_start: start,
            cursor: 0,
            eof: false,
        }
    }

    /// Read the next start code from `reader`, which must be positioned
    /// where the scanner's buffer ends
    pub fn next<R: Read>(&mut self, reader: &mut R) -> D2vResult<Option<StartCode>> {
        loop {
            let window = &self.buffer[self.cursor..];
            match find_start_code(window) {
                Some((offset, code)) => {
                    let prefix = self.cursor + offset;
                    let available = self.buffer.len() - (prefix + 4);
                    if available >= MAX_HEADER_PAYLOAD || self.eof {
                        let end = prefix + 4 + available.min(MAX_HEADER_PAYLOAD);
                        let start_code = StartCode {
                            position: self.buffer_start + prefix as i64,
                            code,
                            payload: self.buffer[prefix + 4..end].to_vec(),
                        };
                        self.cursor = prefix + 4;
                        return Ok(Some(start_code));
                    }
                    self.cursor = prefix;
                }
                None => {
                    if self.eof {
                        return Ok(None);
                    }
                    // Keep a possible partial prefix at the end of the buffer
                    self.cursor = self.cursor.max(self.buffer.len().saturating_sub(3));
                }
            }

            if !self.refill(reader)? {
                self.eof = true;
            }
        }
    }

    fn refill<R: Read>(&mut self, reader: &mut R) -> D2vResult<bool> {
        self.buffer.drain(..self.cursor);
        self.buffer_start += self.cursor as i64;
        self.cursor = 0;

        let old_len = self.buffer.len();
        self.buffer.resize(old_len + READ_CHUNK, 0);
        let read = reader.read(&mut self.buffer[old_len..]).map_err(|e| D2vError::DemuxError {
            message: format!("Failed to read input: {}", e),
        })?;
        self.buffer.truncate(old_len + read);
        Ok(read > 0)
    }
}

/// Picture source for raw MPEG-1/2 video elementary streams.
///
/// Groups sequence, GOP, picture and extension headers into one access
/// unit per coded frame. The two field pictures of a field pair form one
/// unit, so every descriptor it produces is frame structured unless the
/// stream ends on an orphan field.
pub struct MpegEsSource<S: ByteSpan> {
    span: S,
    container: ContainerInfo,
    family: CodecFamily,
    parser: Mpeg12HeaderParser,
    scanner: StartCodeScanner,
    unit_start: Option<i64>,
}

impl<S: ByteSpan> MpegEsSource<S> {
    /// Probe the span and prepare to demux from its start
    pub fn open(mut span: S) -> D2vResult<Self> {
        let (container, family) = Self::probe(&mut span)?;

        info!(
            codec = %container.streams[0].codec_name,
            width = container.streams[0].width,
            height = container.streams[0].height,
            frame_rate = %container.streams[0].frame_rate,
            "Opened MPEG video elementary stream"
        );

        let mut source = Self {
            span,
            container,
            family,
            parser: Mpeg12HeaderParser::new(),
            scanner: StartCodeScanner::new(0),
            unit_start: None,
        };
        source.open_at(0)?;
        Ok(source)
    }

    fn probe(span: &mut S) -> D2vResult<(ContainerInfo, CodecFamily)> {
        span.seek(SeekFrom::Start(0))?;
        let mut scanner = StartCodeScanner::new(0);
        let mut parser = Mpeg12HeaderParser::new();
        let mut seen_sequence = false;

        while let Some(start_code) = scanner.next(span)? {
            if start_code.position > PROBE_LIMIT {
                break;
            }
            match start_code.code {
                SEQUENCE_HEADER_CODE => {
                    seen_sequence = true;
                    parser.feed(start_code.code, &start_code.payload);
                }
                EXTENSION_START_CODE if seen_sequence => {
                    parser.feed(start_code.code, &start_code.payload);
                }
                PICTURE_START_CODE if seen_sequence => break,
                _ => {}
            }
        }

        if !seen_sequence {
            return Err(D2vError::DemuxError {
                message: "No MPEG-1/2 sequence header found".to_string(),
            });
        }

        let sequence = parser.sequence();
        let mut video = StreamInfo::video(
            ES_VIDEO_STREAM_ID,
            sequence.codec_name(),
            sequence.width,
            sequence.height,
        );
        video.sample_aspect_ratio = sequence.sample_aspect_ratio();
        video.frame_rate = sequence.frame_rate();
        video.colour_range = Some(ColourRange::Limited);

        let container = ContainerInfo {
            format_name: "mpegvideo".to_string(),
            transport_packet_size: None,
            streams: vec![video],
        };
        Ok((container, sequence.codec_family()))
    }

    /// Close the pending unit and describe it
    fn emit(&mut self) -> Option<Packet> {
        let position = self.unit_start.take()?;
        if self.parser.picture_count() == 0 {
            return None;
        }
        let picture = self.parser.describe(position);
        Some(Packet::Video(VideoPacket {
            stream_id: ES_VIDEO_STREAM_ID,
            position,
            picture,
        }))
    }

    fn start_unit(&mut self, start_code: &StartCode) {
        self.unit_start = Some(start_code.position);
        self.parser.begin_unit();
        self.parser.feed(start_code.code, &start_code.payload);
    }
}

impl<S: ByteSpan> PacketSource for MpegEsSource<S> {
    fn container(&self) -> &ContainerInfo {
        &self.container
    }

    fn codec_family(&self, video_stream_id: i32) -> Option<CodecFamily> {
        (video_stream_id == ES_VIDEO_STREAM_ID).then_some(self.family)
    }

    fn span_size(&self) -> i64 {
        self.span.size() as i64
    }

    fn open_at(&mut self, offset: i64) -> D2vResult<()> {
        let offset = offset.max(0);
        self.span.seek(SeekFrom::Start(offset as u64))?;
        self.scanner = StartCodeScanner::new(offset);
        self.parser = Mpeg12HeaderParser::new();
        self.unit_start = None;
        debug!(offset, "Restarted elementary stream demuxing");
        Ok(())
    }

    fn next_packet(&mut self) -> D2vResult<Option<Packet>> {
        loop {
            let start_code = match self.scanner.next(&mut self.span)? {
                Some(start_code) => start_code,
                None => return Ok(self.emit()),
            };

            match start_code.code {
                PICTURE_START_CODE => {
                    if self.parser.awaits_second_field() {
                        self.parser.feed(start_code.code, &start_code.payload);
                        continue;
                    }
                    if self.parser.picture_count() > 0 {
                        let packet = self.emit();
                        self.start_unit(&start_code);
                        if packet.is_some() {
                            return Ok(packet);
                        }
                    } else if self.unit_start.is_none() {
                        self.start_unit(&start_code);
                    } else {
                        self.parser.feed(start_code.code, &start_code.payload);
                    }
                }
                SEQUENCE_HEADER_CODE | GROUP_START_CODE => {
                    if self.parser.picture_count() > 0 {
                        let packet = self.emit();
                        self.start_unit(&start_code);
                        if packet.is_some() {
                            return Ok(packet);
                        }
                    } else if self.unit_start.is_none() {
                        self.start_unit(&start_code);
                    } else {
                        self.parser.feed(start_code.code, &start_code.payload);
                    }
                }
                SEQUENCE_END_CODE => {
                    if let Some(packet) = self.emit() {
                        self.parser.begin_unit();
                        return Ok(Some(packet));
                    }
                }
                EXTENSION_START_CODE => {
                    self.parser.feed(start_code.code, &start_code.payload);
                }
                _ => {}
            }
        }
    }
}
