//! D2V text reader

use std::io::Read;

use crate::domain::model::{Line, Picture};
use crate::error::{D2vError, D2vResult};

const HEADER_MAGIC: &str = "DGIndexProjectFile";

/// A parsed D2V file
#[derive(Debug, Clone, PartialEq)]
pub struct D2vDocument {
    pub version: u32,
    pub files: Vec<String>,
    /// Settings in file order
    pub settings: Vec<(String, String)>,
    pub lines: Vec<Line>,
    /// Whether the ` ff` stream end marker was present
    pub complete: bool,
}

impl D2vDocument {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn num_frames(&self) -> usize {
        self.lines.iter().map(|l| l.pictures.len()).sum()
    }
}

fn parse_error(line: usize, message: impl Into<String>) -> D2vError {
    D2vError::ParseError {
        line,
        message: message.into(),
    }
}

fn parse_field<T>(token: Option<&str>, radix: u32, line: usize, name: &str) -> D2vResult<T>
where
    T: TryFrom<i64>,
{
    let token = token.ok_or_else(|| parse_error(line, format!("missing {}", name)))?;
    let value = i64::from_str_radix(token, radix)
        .map_err(|_| parse_error(line, format!("invalid {} '{}'", name, token)))?;
    T::try_from(value).map_err(|_| parse_error(line, format!("{} out of range: {}", name, token)))
}

fn parse_data_line(text: &str, line_number: usize) -> D2vResult<(Line, bool)> {
    let mut tokens = text.split_whitespace();

    let info: u16 = parse_field(tokens.next(), 16, line_number, "info")?;
    let matrix: u8 = parse_field(tokens.next(), 10, line_number, "matrix")?;
    let file_index: i32 = parse_field(tokens.next(), 10, line_number, "file")?;
    let byte_position: i64 = parse_field(tokens.next(), 10, line_number, "position")?;
    let skip: i32 = parse_field(tokens.next(), 10, line_number, "skip")?;
    let vob: i32 = parse_field(tokens.next(), 10, line_number, "vob")?;
    let cell: i32 = parse_field(tokens.next(), 10, line_number, "cell")?;

    let mut line = Line {
        info,
        matrix,
        file_index,
        byte_position,
        skip,
        vob,
        cell,
        pictures: Vec::new(),
    };

    let mut end = false;
    for token in tokens {
        if end {
            return Err(parse_error(line_number, "data after stream end marker"));
        }
        if token.eq_ignore_ascii_case("ff") {
            end = true;
            continue;
        }
        let flags: u8 = parse_field(Some(token), 16, line_number, "picture flags")?;
        line.pictures.push(Picture::new(flags));
    }

    Ok((line, end))
}

/// Parse a complete D2V document
pub fn parse_d2v(text: &str) -> D2vResult<D2vDocument> {
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));

    let (number, magic) = lines.next().ok_or_else(|| parse_error(1, "empty file"))?;
    let version = magic
        .strip_prefix(HEADER_MAGIC)
        .ok_or_else(|| parse_error(number, "not a D2V file"))?;
    let version: u32 = parse_field(Some(version.trim()), 10, number, "version")?;

    let (number, count) = lines
        .next()
        .ok_or_else(|| parse_error(number + 1, "missing file count"))?;
    let count: usize = parse_field(Some(count.trim()), 10, number, "file count")?;

    let mut files = Vec::with_capacity(count);
    for _ in 0..count {
        let (_, name) = lines
            .next()
            .ok_or_else(|| parse_error(number, "file list is shorter than its count"))?;
        files.push(name.to_string());
    }

    // Blank line ending the file list, then settings until the next blank
    let mut settings = Vec::new();
    let mut seen_blank = false;
    for (number, text) in lines.by_ref() {
        if text.trim().is_empty() {
            if seen_blank {
                break;
            }
            seen_blank = true;
            continue;
        }
        let (key, value) = text
            .split_once('=')
            .ok_or_else(|| parse_error(number, format!("malformed setting '{}'", text)))?;
        settings.push((key.to_string(), value.to_string()));
    }

    let mut data = Vec::new();
    let mut complete = false;
    for (number, text) in lines {
        if text.trim().is_empty() {
            continue;
        }
        if complete {
            return Err(parse_error(number, "data after stream end marker"));
        }
        let (line, end) = parse_data_line(text, number)?;
        data.push(line);
        complete = end;
    }

    Ok(D2vDocument {
        version,
        files,
        settings,
        lines: data,
        complete,
    })
}

/// Reads a D2V document from any byte source
pub struct D2vReader<R: Read> {
    input: R,
}

impl<R: Read> D2vReader<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    pub fn read(mut self) -> D2vResult<D2vDocument> {
        let mut text = String::new();
        self.input.read_to_string(&mut text)?;
        parse_d2v(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::*;
    use crate::output::writer::format_d2v;

    fn settings() -> StreamSettings {
        StreamSettings {
            stream_type: StreamType::Elementary,
            mpeg_type: MpegType::Mpeg1,
            transport_pids: None,
            transport_packet_size: None,
            colour_range: ColourRange::Full,
            aspect_ratio: Rational::new(4, 3),
            width: 352,
            height: 240,
            frame_rate: Rational::new(30000, 1001),
        }
    }

    #[test]
    fn test_formatted_document_parses_back() {
        let mut first = Line::open(0xd00, 5, 0);
        first.pictures = vec![Picture::new(0xd0), Picture::new(0xf3), Picture::new(0x62)];
        let mut second = Line::open(0x900, 1, 1_234_567_890_123);
        second.file_index = 3;
        second.pictures = vec![Picture::new(0x90)];

        let lines = vec![first, second];
        let text = format_d2v(
            CodecFamily::Mpeg1,
            &["x.mpg".to_string(), "y.mpg".to_string()],
            &settings(),
            &lines,
        );

        let doc = parse_d2v(&text).unwrap();
        assert_eq!(doc.version, 16);
        assert_eq!(doc.files, vec!["x.mpg", "y.mpg"]);
        assert_eq!(doc.setting("Frame_Rate"), Some("29970 (30000/1001)"));
        assert_eq!(doc.setting("YUVRGB_Scale"), Some("0"));
        assert_eq!(doc.lines, lines);
        assert!(doc.complete);
        assert_eq!(doc.num_frames(), 4);
    }

    #[test]
    fn test_truncated_document_is_incomplete() {
        let text = "DGIndexProjectFile16\n1\na.m2v\n\nStream_Type=0\n\nd00 5 0 0 0 0 0 d2 b2";
        let doc = parse_d2v(text).unwrap();
        assert!(!doc.complete);
        assert_eq!(doc.lines[0].pictures.len(), 2);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            parse_d2v("hello\n"),
            Err(D2vError::ParseError { line: 1, .. })
        ));

        let bad_flag = "DGIndexProjectFile16\n0\n\nStream_Type=0\n\nd00 5 0 0 0 0 0 zz ff\n";
        let err = parse_d2v(bad_flag).unwrap_err();
        assert!(err.to_string().contains("picture flags"));
    }

    #[test]
    fn test_reader_wraps_parse() {
        let text = "DGIndexProjectFile42\n0\n\nStream_Type=0\n\n900 1 0 0 0 0 0 d0 ff\n";
        let doc = D2vReader::new(text.as_bytes()).read().unwrap();
        assert_eq!(doc.version, 42);
        assert!(doc.files.is_empty());
        assert_eq!(doc.lines.len(), 1);
    }
}
