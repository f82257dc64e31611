//! D2V file writing and reading

pub mod reader;
pub mod writer;

pub use reader::{parse_d2v, D2vDocument, D2vReader};
pub use writer::{format_d2v, D2vWriter};

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{D2vError, D2vResult};

/// Where the index goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    /// `-` selects stdout
    pub fn parse(value: &str) -> Self {
        if value == "-" {
            OutputTarget::Stdout
        } else {
            OutputTarget::File(PathBuf::from(value))
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            OutputTarget::Stdout => None,
            OutputTarget::File(path) => Some(path),
        }
    }

    /// Open the target for writing, truncating an existing file
    pub fn open(&self) -> D2vResult<Box<dyn Write + Send>> {
        match self {
            OutputTarget::Stdout => Ok(Box::new(BufWriter::new(io::stdout()))),
            OutputTarget::File(path) => {
                let file = File::create(path).map_err(|e| {
                    D2vError::output(format!("Failed to open '{}': {}", path.display(), e))
                })?;
                Ok(Box::new(BufWriter::new(file)))
            }
        }
    }
}
