//! Synthetic MPEG-2 video elementary streams for integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub const PICTURE_I: u8 = 1;
pub const PICTURE_P: u8 = 2;
pub const PICTURE_B: u8 = 3;

/// Builds a 720x480 interlaced 29.97 fps MPEG-2 stream, top field first.
/// Every picture carries a short dummy slice.
pub struct StreamBuilder {
    pub data: Vec<u8>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    fn code(&mut self, code: u8, payload: &[u8]) -> i64 {
        let position = self.data.len() as i64;
        self.data.extend_from_slice(&[0, 0, 1, code]);
        self.data.extend_from_slice(payload);
        position
    }

    /// Sequence header plus sequence extension; returns the header offset
    pub fn sequence(&mut self) -> i64 {
        let position = self.code(0xb3, &[0x2d, 0x01, 0xe0, 0x34, 0xff, 0xff, 0xe0, 0x00]);
        self.code(0xb5, &[0x14, 0x40, 0x00, 0x01, 0x00, 0x00]);
        position
    }

    pub fn gop(&mut self, closed: bool) -> i64 {
        self.code(0xb8, &[0x00, 0x08, 0x00, if closed { 0x40 } else { 0x00 }])
    }

    /// Frame picture with a coding extension and one slice
    pub fn picture(&mut self, coding_type: u8) -> i64 {
        let position = self.code(0x00, &[0x00, coding_type << 3, 0xff, 0xf8]);
        self.code(0xb5, &[0x8f, 0xff, 0xf3, 0x80, 0x00]);
        self.code(0x01, &[0x55; 64]);
        position
    }

    /// One GOP: sequence header, GOP header and the given picture types.
    /// Returns the offset of the sequence header.
    pub fn gop_with(&mut self, closed: bool, types: &[u8]) -> i64 {
        let position = self.sequence();
        self.gop(closed);
        for &coding_type in types {
            self.picture(coding_type);
        }
        position
    }

    pub fn end(&mut self) {
        self.code(0xb7, &[]);
    }
}

/// Two GOPs of four frames each; returns the stream and the GOP offsets
pub fn two_gop_stream() -> (Vec<u8>, [i64; 2]) {
    let mut stream = StreamBuilder::new();
    let first = stream.gop_with(true, &[PICTURE_I, PICTURE_P, PICTURE_B, PICTURE_B]);
    let second = stream.gop_with(false, &[PICTURE_I, PICTURE_B, PICTURE_B, PICTURE_P]);
    stream.end();
    (stream.data, [first, second])
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).expect("write test input");
    path
}
