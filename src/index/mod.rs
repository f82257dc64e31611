//! Index construction and frame lookups over the finished line list

pub mod gop;
pub mod keyframe_verifier;

pub use gop::GopLineAggregator;
pub use keyframe_verifier::{KeyframeVerifier, VerificationReport};

use crate::domain::model::{Line, Stats};

/// The finished index: sealed lines plus per-frame lookups
#[derive(Debug, Clone, PartialEq)]
pub struct D2vIndex {
    lines: Vec<Line>,
    stats: Stats,
    /// frame number of the first picture of each line, plus the total
    line_starts: Vec<usize>,
}

impl D2vIndex {
    pub fn new(lines: Vec<Line>) -> Self {
        let stats = Stats::from_lines(&lines);
        let mut line_starts = Vec::with_capacity(lines.len() + 1);
        let mut total = 0;
        for line in &lines {
            line_starts.push(total);
            total += line.pictures.len();
        }
        line_starts.push(total);

        Self {
            lines,
            stats,
            line_starts,
        }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<Line> {
        self.lines
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn num_frames(&self) -> usize {
        self.line_starts.last().copied().unwrap_or(0)
    }

    /// Index of the line holding `frame`
    fn line_of(&self, frame: usize) -> Option<usize> {
        if frame >= self.num_frames() {
            return None;
        }
        // Last line start <= frame. Empty lines share their start with the
        // next line, so skip past them.
        let index = self.line_starts.partition_point(|&start| start <= frame);
        Some(index - 1)
    }

    pub fn gop_start_frame(&self, frame: usize) -> Option<usize> {
        self.line_of(frame).map(|line| self.line_starts[line])
    }

    pub fn next_gop_start_frame(&self, frame: usize) -> Option<usize> {
        self.line_of(frame).map(|line| self.line_starts[line + 1])
    }

    pub fn gop_start_position(&self, frame: usize) -> Option<i64> {
        self.line_of(frame).map(|line| self.lines[line].byte_position)
    }

    /// Position of the following GOP, `i64::MAX` when `frame` is in the last one
    pub fn next_gop_start_position(&self, frame: usize) -> Option<i64> {
        self.line_of(frame).map(|line| {
            self.lines
                .get(line + 1)
                .map_or(i64::MAX, |next| next.byte_position)
        })
    }

    pub fn is_open_gop(&self, frame: usize) -> bool {
        self.line_of(frame)
            .map_or(false, |line| !self.lines[line].is_closed_gop())
    }

    /// Number of lines without the closed GOP bit
    pub fn open_gop_count(&self) -> usize {
        self.lines.iter().filter(|line| !line.is_closed_gop()).count()
    }
}
