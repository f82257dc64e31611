// Ports - Contracts between the indexer core and its collaborators

use std::io::{Read, Seek};

use crate::domain::model::*;
use crate::error::D2vResult;

/// A logical byte address space laid over one or more physical files
pub trait ByteSpan: Read + Seek {
    /// Total size of all files
    fn size(&self) -> u64;

    /// Index of the file holding `offset`, `None` past the end
    fn file_index_of(&self, offset: u64) -> Option<usize>;

    /// Position of `offset` inside the file that holds it
    fn in_file_offset(&self, offset: u64) -> Option<u64>;
}

/// Translates logical span offsets into (file index, in-file offset)
pub trait OffsetTranslator {
    fn translate(&self, offset: i64) -> Option<(i32, i64)>;
}

/// A packet of the selected video stream
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPacket {
    pub stream_id: i32,
    /// Logical span offset of the packet
    pub position: i64,
    /// Classified picture, when the packet carries the start of one
    pub picture: Option<PictureDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    pub stream_id: i32,
    pub position: i64,
    pub pts: Option<i64>,
    pub time_base: Rational,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Video(VideoPacket),
    Audio(AudioPacket),
    Other { stream_id: i32, position: i64 },
}

impl Packet {
    pub fn position(&self) -> i64 {
        match self {
            Packet::Video(video) => video.position,
            Packet::Audio(audio) => audio.position,
            Packet::Other { position, .. } => *position,
        }
    }
}

/// Restartable, finite producer of demuxed and classified packets.
///
/// Positions are always reported in logical span coordinates, whatever
/// offset demuxing was restarted from.
pub trait PacketSource {
    /// Streams and container family
    fn container(&self) -> &ContainerInfo;

    /// Codec family of the given video stream
    fn codec_family(&self, video_stream_id: i32) -> Option<CodecFamily>;

    /// Total size of the underlying span in bytes
    fn span_size(&self) -> i64;

    /// Restart demuxing as if the span began at `offset`. 0 rewinds.
    fn open_at(&mut self, offset: i64) -> D2vResult<()>;

    /// Next packet, `None` at the end of the span
    fn next_packet(&mut self) -> D2vResult<Option<Packet>>;
}

impl<T: PacketSource + ?Sized> PacketSource for Box<T> {
    fn container(&self) -> &ContainerInfo {
        (**self).container()
    }

    fn codec_family(&self, video_stream_id: i32) -> Option<CodecFamily> {
        (**self).codec_family(video_stream_id)
    }

    fn span_size(&self) -> i64 {
        (**self).span_size()
    }

    fn open_at(&mut self, offset: i64) -> D2vResult<()> {
        (**self).open_at(offset)
    }

    fn next_packet(&mut self) -> D2vResult<Option<Packet>> {
        (**self).next_packet()
    }
}
