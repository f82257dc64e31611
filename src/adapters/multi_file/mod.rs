// Multi-file span adapter - Several physical files read as one byte stream

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{D2vError, D2vResult};
use crate::ports::{ByteSpan, OffsetTranslator};

/// File names and sizes of a span, without the open handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanLayout {
    paths: Vec<PathBuf>,
    sizes: Vec<u64>,
}

impl SpanLayout {
    pub fn new(paths: Vec<PathBuf>, sizes: Vec<u64>) -> Self {
        debug_assert_eq!(paths.len(), sizes.len());
        Self { paths, sizes }
    }

    /// Layout for files that exist on disk
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> D2vResult<Self> {
        let mut names = Vec::with_capacity(paths.len());
        let mut sizes = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let metadata = std::fs::metadata(path).map_err(|e| D2vError::SpanError {
                message: format!("Failed to open input file '{}': {}", path.display(), e),
            })?;
            names.push(path.to_path_buf());
            sizes.push(metadata.len());
        }
        Ok(Self::new(names, sizes))
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn sizes(&self) -> &[u64] {
        &self.sizes
    }

    pub fn file_count(&self) -> usize {
        self.paths.len()
    }

    pub fn total_size(&self) -> u64 {
        self.sizes.iter().sum()
    }

    pub fn file_index_of(&self, offset: u64) -> Option<usize> {
        self.locate(offset).map(|(index, _)| index)
    }

    pub fn in_file_offset(&self, offset: u64) -> Option<u64> {
        self.locate(offset).map(|(_, in_file)| in_file)
    }

    fn locate(&self, mut offset: u64) -> Option<(usize, u64)> {
        for (index, size) in self.sizes.iter().enumerate() {
            if offset < *size {
                return Some((index, offset));
            }
            offset -= size;
        }
        None
    }
}

impl OffsetTranslator for SpanLayout {
    fn translate(&self, offset: i64) -> Option<(i32, i64)> {
        if offset < 0 {
            return None;
        }
        self.locate(offset as u64)
            .map(|(index, in_file)| (index as i32, in_file as i64))
    }
}

/// Reads an ordered list of files as one contiguous byte stream
pub struct MultiFileSpan {
    files: Vec<File>,
    layout: SpanLayout,
    position: u64,
}

impl MultiFileSpan {
    /// Open every file of the span
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> D2vResult<Self> {
        if paths.is_empty() {
            return Err(D2vError::SpanError {
                message: "No input files given".to_string(),
            });
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let file = File::open(path).map_err(|e| D2vError::SpanError {
                message: format!("Failed to open input file '{}': {}", path.display(), e),
            })?;
            files.push(file);
        }
        let layout = SpanLayout::from_paths(paths)?;

        debug!(
            files = layout.file_count(),
            total_size = layout.total_size(),
            "Opened multi-file span"
        );

        Ok(Self {
            files,
            layout,
            position: 0,
        })
    }

    pub fn layout(&self) -> &SpanLayout {
        &self.layout
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Read for MultiFileSpan {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            let (index, in_file) = match self.layout.locate(self.position) {
                Some(location) => location,
                None => break,
            };

            let remaining_in_file = self.layout.sizes[index] - in_file;
            let wanted = (buf.len() - filled).min(remaining_in_file as usize);

            let file = &mut self.files[index];
            file.seek(SeekFrom::Start(in_file))?;
            let read = file.read(&mut buf[filled..filled + wanted])?;
            if read == 0 {
                // File shrank since the span was opened
                break;
            }

            filled += read;
            self.position += read as u64;
        }

        Ok(filled)
    }
}

impl Seek for MultiFileSpan {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => self.layout.total_size() as i128 + delta as i128,
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }

        self.position = target as u64;
        Ok(self.position)
    }
}

impl ByteSpan for MultiFileSpan {
    fn size(&self) -> u64 {
        self.layout.total_size()
    }

    fn file_index_of(&self, offset: u64) -> Option<usize> {
        self.layout.file_index_of(offset)
    }

    fn in_file_offset(&self, offset: u64) -> Option<u64> {
        self.layout.in_file_offset(offset)
    }
}

/// In-memory single-file span
impl<T: AsRef<[u8]>> ByteSpan for std::io::Cursor<T> {
    fn size(&self) -> u64 {
        self.get_ref().as_ref().len() as u64
    }

    fn file_index_of(&self, offset: u64) -> Option<usize> {
        (offset < self.size()).then_some(0)
    }

    fn in_file_offset(&self, offset: u64) -> Option<u64> {
        (offset < self.size()).then_some(offset)
    }
}
