//! MPEG-1/2 video header decoding.
//!
//! Only the fields the index needs are decoded. Sequence-level values live in
//! the parser instance so every stream gets its own state; picture-level
//! values are reset at the start of each access unit.

use crate::domain::model::*;

pub const PICTURE_START_CODE: u8 = 0x00;
pub const SLICE_START_CODE_MIN: u8 = 0x01;
pub const SLICE_START_CODE_MAX: u8 = 0xaf;
pub const SEQUENCE_HEADER_CODE: u8 = 0xb3;
pub const EXTENSION_START_CODE: u8 = 0xb5;
pub const SEQUENCE_END_CODE: u8 = 0xb7;
pub const GROUP_START_CODE: u8 = 0xb8;

const SEQUENCE_EXTENSION: u8 = 1;
const SEQUENCE_DISPLAY_EXTENSION: u8 = 2;
const PICTURE_CODING_EXTENSION: u8 = 8;

/// Bytes after a start code that header decoding may look at
pub const MAX_HEADER_PAYLOAD: usize = 12;

/// Find the next `00 00 01 xx` in `data`, returning the offset of the
/// prefix and the start code value
pub fn find_start_code(data: &[u8]) -> Option<(usize, u8)> {
    data.windows(4)
        .position(|w| w[0] == 0 && w[1] == 0 && w[2] == 1)
        .map(|i| (i, data[i + 3]))
}

/// Sequence-level state, kept across access units
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceInfo {
    pub width: i32,
    pub height: i32,
    pub mpeg2: bool,
    pub progressive_sequence: bool,
    pub aspect_ratio_code: u8,
    pub frame_rate_code: u8,
    pub frame_rate_extension_n: u8,
    pub frame_rate_extension_d: u8,
    pub matrix_coefficients: Option<u8>,
}

impl SequenceInfo {
    pub fn codec_family(&self) -> CodecFamily {
        if self.mpeg2 {
            CodecFamily::Mpeg2
        } else {
            CodecFamily::Mpeg1
        }
    }

    pub fn codec_name(&self) -> &'static str {
        if self.mpeg2 {
            "mpeg2video"
        } else {
            "mpeg1video"
        }
    }

    /// Frame rate from `frame_rate_code` and the MPEG-2 extension
    pub fn frame_rate(&self) -> Rational {
        let (num, den): (i64, i64) = match self.frame_rate_code {
            1 => (24000, 1001),
            2 => (24, 1),
            3 => (25, 1),
            4 => (30000, 1001),
            5 => (30, 1),
            6 => (50, 1),
            7 => (60000, 1001),
            8 => (60, 1),
            _ => return Rational::default(),
        };
        let num = num * (self.frame_rate_extension_n as i64 + 1);
        let den = den * (self.frame_rate_extension_d as i64 + 1);
        Rational::reduce(num, den, i32::MAX as i64).0
    }

    /// Sample aspect ratio derived from `aspect_ratio_information`
    pub fn sample_aspect_ratio(&self) -> Rational {
        if self.width <= 0 || self.height <= 0 {
            return Rational::new(1, 1);
        }
        let (w, h) = (self.width as i64, self.height as i64);

        if self.mpeg2 {
            // MPEG-2 signals the display aspect ratio
            let (dar_num, dar_den) = match self.aspect_ratio_code {
                2 => (4, 3),
                3 => (16, 9),
                4 => (221, 100),
                _ => return Rational::new(1, 1),
            };
            Rational::reduce(dar_num * h, dar_den * w, 255).0
        } else {
            // MPEG-1 signals the pel aspect ratio as height/width * 10000
            const PEL_ASPECT: [i64; 15] = [
                0, 10000, 6735, 7031, 7615, 8055, 8437, 8935, 9157, 9815, 10255, 10695, 10950,
                11575, 12015,
            ];
            match PEL_ASPECT.get(self.aspect_ratio_code as usize) {
                Some(&value) if value > 0 => Rational::reduce(10000, value, 255).0,
                _ => Rational::new(1, 1),
            }
        }
    }
}

/// Picture-level headers of the current access unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UnitHeaders {
    pictures: u8,
    coding_type: u8,
    sequence_header: bool,
    group_header: bool,
    closed_gop: bool,
    top_field_first: bool,
    repeat_first_field: bool,
    progressive_frame: bool,
    picture_structure: u8,
    second_field_structure: u8,
}

/// Decoder for MPEG-1/2 sequence, GOP, picture and extension headers
#[derive(Debug, Clone, Default)]
pub struct Mpeg12HeaderParser {
    sequence: SequenceInfo,
    unit: UnitHeaders,
}

impl Mpeg12HeaderParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(&self) -> &SequenceInfo {
        &self.sequence
    }

    /// Forget picture-level state before a new access unit
    pub fn begin_unit(&mut self) {
        self.unit = UnitHeaders::default();
    }

    pub fn picture_count(&self) -> u8 {
        self.unit.pictures
    }

    /// True when the unit holds a single field still waiting for its pair
    pub fn awaits_second_field(&self) -> bool {
        self.unit.pictures == 1 && matches!(self.unit.picture_structure, 1 | 2)
    }

    /// Decode one header. `payload` holds the bytes following the start code.
    pub fn feed(&mut self, start_code: u8, payload: &[u8]) {
        match start_code {
            PICTURE_START_CODE => {
                self.unit.pictures = self.unit.pictures.saturating_add(1);
                if self.unit.pictures == 1 && payload.len() >= 2 {
                    self.unit.coding_type = (payload[1] >> 3) & 7;
                    // MPEG-1 pictures are frames unless an extension says otherwise
                    self.unit.picture_structure = 3;
                }
            }
            SEQUENCE_HEADER_CODE => {
                self.unit.sequence_header = true;
                if payload.len() >= 4 {
                    self.sequence.width = ((payload[0] as i32) << 4) | (payload[1] as i32 >> 4);
                    self.sequence.height = ((payload[1] as i32 & 0xf) << 8) | payload[2] as i32;
                    self.sequence.aspect_ratio_code = payload[3] >> 4;
                    self.sequence.frame_rate_code = payload[3] & 0xf;
                    // Reset until a sequence extension proves otherwise
                    self.sequence.mpeg2 = false;
                    self.sequence.progressive_sequence = true;
                    self.sequence.frame_rate_extension_n = 0;
                    self.sequence.frame_rate_extension_d = 0;
                }
            }
            EXTENSION_START_CODE => self.feed_extension(payload),
            GROUP_START_CODE => {
                self.unit.group_header = true;
                if payload.len() >= 4 {
                    self.unit.closed_gop = payload[3] & (1 << 6) != 0;
                }
            }
            _ => {}
        }
    }

    fn feed_extension(&mut self, payload: &[u8]) {
        let extension_type = match payload.first() {
            Some(byte) => byte >> 4,
            None => return,
        };

        match extension_type {
            SEQUENCE_EXTENSION if payload.len() >= 3 => {
                let sequence = &mut self.sequence;
                if !sequence.mpeg2 && sequence.width > 0 && sequence.height > 0 {
                    let horizontal = ((payload[1] as i32 & 1) << 1) | (payload[2] as i32 >> 7);
                    let vertical = (payload[2] as i32 >> 5) & 3;
                    sequence.width |= horizontal << 12;
                    sequence.height |= vertical << 12;
                }
                sequence.mpeg2 = true;
                sequence.progressive_sequence = payload[1] & (1 << 3) != 0;
                if payload.len() >= 6 {
                    sequence.frame_rate_extension_n = (payload[5] >> 5) & 3;
                    sequence.frame_rate_extension_d = payload[5] & 0x1f;
                }
            }
            SEQUENCE_DISPLAY_EXTENSION => {
                let colour_description = payload[0] & 1 != 0;
                if colour_description && payload.len() >= 4 {
                    self.sequence.matrix_coefficients = Some(payload[3]);
                }
            }
            PICTURE_CODING_EXTENSION if payload.len() >= 5 => {
                let structure = payload[2] & 3;
                if self.unit.pictures >= 2 {
                    self.unit.second_field_structure = structure;
                    return;
                }
                self.unit.picture_structure = structure;
                self.unit.top_field_first = payload[3] & (1 << 7) != 0;
                self.unit.repeat_first_field = payload[3] & (1 << 1) != 0;
                self.unit.progressive_frame = payload[4] & (1 << 7) != 0;
            }
            _ => {}
        }
    }

    /// Decode every header in a buffer holding one access unit
    pub fn parse_access_unit(&mut self, data: &[u8]) {
        self.begin_unit();
        let mut rest = data;
        while let Some((offset, code)) = find_start_code(rest) {
            let payload = &rest[offset + 4..];
            let visible = &payload[..payload.len().min(MAX_HEADER_PAYLOAD)];
            if (SLICE_START_CODE_MIN..=SLICE_START_CODE_MAX).contains(&code) {
                // Slice data carries no headers, skip to the next non-slice code
                rest = payload;
                continue;
            }
            self.feed(code, visible);
            rest = payload;
        }
    }

    /// Describe the picture of the current unit, if it has one
    pub fn describe(&self, byte_position: i64) -> Option<PictureDescriptor> {
        if self.unit.pictures == 0 {
            return None;
        }

        let unit = &self.unit;
        let sequence = &self.sequence;
        let coding_type = CodingType::from_mpeg_code(unit.coding_type);

        let mut descriptor = PictureDescriptor::new(coding_type, byte_position);
        descriptor.width = sequence.width;
        descriptor.height = sequence.height;
        descriptor.is_keyframe =
            coding_type == CodingType::I && (unit.sequence_header || unit.group_header);
        descriptor.closed_gop = unit.group_header && unit.closed_gop;
        descriptor.colour_matrix = sequence.matrix_coefficients;

        if !sequence.mpeg2 {
            descriptor.progressive_sequence = true;
            descriptor.progressive_frame = true;
            return Some(descriptor);
        }

        descriptor.progressive_sequence = sequence.progressive_sequence;

        let first = PictureStructure::from_mpeg_code(unit.picture_structure)
            .unwrap_or(PictureStructure::Frame);
        let paired = unit.pictures >= 2 && first.is_field();

        if paired {
            descriptor.picture_structure = PictureStructure::Frame;
            descriptor.top_field_first = first == PictureStructure::TopField;
            descriptor.progressive_frame = false;
            descriptor.repeat_field_count = 1;
        } else {
            descriptor.picture_structure = first;
            descriptor.top_field_first = unit.top_field_first;
            descriptor.progressive_frame = unit.progressive_frame;
            descriptor.repeat_field_count = match (unit.repeat_first_field, sequence.progressive_sequence) {
                (false, _) => 1,
                (true, true) if unit.top_field_first => 5,
                (true, true) => 3,
                (true, false) => 2,
            };
        }

        Some(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 720x576, 4:3, 25 fps sequence header payload
    const SEQUENCE: [u8; 8] = [0x2d, 0x02, 0x40, 0x23, 0xff, 0xff, 0xe0, 0x00];

    fn sequence_extension(progressive: bool) -> [u8; 6] {
        let flags = if progressive { 0x48 } else { 0x40 };
        [0x14, flags, 0x00, 0x01, 0x00, 0x00]
    }

    fn picture(coding_type: u8) -> [u8; 4] {
        [0x00, coding_type << 3, 0xff, 0xf8]
    }

    fn coding_extension(structure: u8, tff: bool, rff: bool, progressive: bool) -> [u8; 5] {
        let mut d3 = 0u8;
        if tff {
            d3 |= 0x80;
        }
        if rff {
            d3 |= 0x02;
        }
        [0x8f, 0xff, 0xf0 | structure, d3, if progressive { 0x80 } else { 0x00 }]
    }

    #[test]
    fn test_sequence_header_fields() {
        let mut parser = Mpeg12HeaderParser::new();
        parser.feed(SEQUENCE_HEADER_CODE, &SEQUENCE);
        parser.feed(EXTENSION_START_CODE, &sequence_extension(false));
        let sequence = parser.sequence();
        assert_eq!((sequence.width, sequence.height), (720, 576));
        assert!(sequence.mpeg2);
        assert!(!sequence.progressive_sequence);
        assert_eq!(sequence.frame_rate(), Rational::new(25, 1));
        assert_eq!(sequence.sample_aspect_ratio(), Rational::new(16, 15));
        assert_eq!(sequence.codec_family(), CodecFamily::Mpeg2);
    }

    #[test]
    fn test_keyframe_needs_sequence_or_gop_header() {
        let mut parser = Mpeg12HeaderParser::new();
        parser.feed(SEQUENCE_HEADER_CODE, &SEQUENCE);
        parser.feed(EXTENSION_START_CODE, &sequence_extension(false));

        parser.begin_unit();
        parser.feed(GROUP_START_CODE, &[0x00, 0x08, 0x00, 0x40]);
        parser.feed(PICTURE_START_CODE, &picture(1));
        let key = parser.describe(0).unwrap();
        assert!(key.is_keyframe);
        assert!(key.closed_gop);

        parser.begin_unit();
        parser.feed(PICTURE_START_CODE, &picture(1));
        let intra = parser.describe(100).unwrap();
        assert_eq!(intra.coding_type, CodingType::I);
        assert!(!intra.is_keyframe);
        assert_eq!(intra.byte_position, 100);
    }

    #[test]
    fn test_repeat_count_follows_progressive_sequence() {
        let mut parser = Mpeg12HeaderParser::new();
        parser.feed(SEQUENCE_HEADER_CODE, &SEQUENCE);
        parser.feed(EXTENSION_START_CODE, &sequence_extension(true));

        parser.begin_unit();
        parser.feed(PICTURE_START_CODE, &picture(2));
        parser.feed(EXTENSION_START_CODE, &coding_extension(3, true, true, true));
        assert_eq!(parser.describe(0).unwrap().repeat_field_count, 5);

        parser.begin_unit();
        parser.feed(PICTURE_START_CODE, &picture(2));
        parser.feed(EXTENSION_START_CODE, &coding_extension(3, false, true, true));
        assert_eq!(parser.describe(0).unwrap().repeat_field_count, 3);

        parser.feed(SEQUENCE_HEADER_CODE, &SEQUENCE);
        parser.feed(EXTENSION_START_CODE, &sequence_extension(false));
        parser.begin_unit();
        parser.feed(PICTURE_START_CODE, &picture(3));
        parser.feed(EXTENSION_START_CODE, &coding_extension(3, true, true, true));
        let soft_telecine = parser.describe(0).unwrap();
        assert_eq!(soft_telecine.repeat_field_count, 2);
        assert!(soft_telecine.top_field_first);
        assert!(soft_telecine.progressive_frame);
    }

    #[test]
    fn test_field_pair_becomes_one_frame() {
        let mut parser = Mpeg12HeaderParser::new();
        parser.feed(SEQUENCE_HEADER_CODE, &SEQUENCE);
        parser.feed(EXTENSION_START_CODE, &sequence_extension(false));

        parser.begin_unit();
        parser.feed(PICTURE_START_CODE, &picture(1));
        parser.feed(EXTENSION_START_CODE, &coding_extension(2, false, false, false));
        assert!(parser.awaits_second_field());
        parser.feed(PICTURE_START_CODE, &picture(2));
        parser.feed(EXTENSION_START_CODE, &coding_extension(1, false, false, false));
        assert!(!parser.awaits_second_field());

        let frame = parser.describe(0).unwrap();
        assert_eq!(frame.coding_type, CodingType::I);
        assert_eq!(frame.picture_structure, PictureStructure::Frame);
        assert!(!frame.top_field_first);
    }

    #[test]
    fn test_mpeg1_is_progressive() {
        let mut parser = Mpeg12HeaderParser::new();
        parser.feed(SEQUENCE_HEADER_CODE, &[0x16, 0x00, 0xf0, 0x14, 0xff, 0xff, 0xe0, 0x00]);
        parser.begin_unit();
        parser.feed(PICTURE_START_CODE, &picture(1));
        let descriptor = parser.describe(0).unwrap();
        assert_eq!((descriptor.width, descriptor.height), (352, 240));
        assert!(descriptor.progressive_frame);
        assert_eq!(parser.sequence().codec_name(), "mpeg1video");
        assert_eq!(parser.sequence().frame_rate(), Rational::new(30000, 1001));
    }

    #[test]
    fn test_parse_access_unit_buffer() {
        let mut data = vec![0x00, 0x00, 0x01, SEQUENCE_HEADER_CODE];
        data.extend_from_slice(&SEQUENCE);
        data.extend_from_slice(&[0x00, 0x00, 0x01, EXTENSION_START_CODE]);
        data.extend_from_slice(&sequence_extension(false));
        data.extend_from_slice(&[0x00, 0x00, 0x01, PICTURE_START_CODE]);
        data.extend_from_slice(&picture(1));
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0x01, 0x12, 0x34]);

        let mut parser = Mpeg12HeaderParser::new();
        parser.parse_access_unit(&data);
        let descriptor = parser.describe(0).unwrap();
        assert!(descriptor.is_keyframe);
        assert!(!descriptor.closed_gop);
        assert_eq!(descriptor.width, 720);
    }

    #[test]
    fn test_find_start_code() {
        assert_eq!(find_start_code(&[0xff, 0x00, 0x00, 0x01, 0xb3]), Some((1, 0xb3)));
        assert_eq!(find_start_code(&[0x00, 0x00, 0x01]), None);
    }
}
