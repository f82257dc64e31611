//! Keyframe reachability verification
//!
//! A keyframe position recorded while demuxing forward is not always a
//! position a byte-seeking reader can restart from. Every line is probed;
//! unreachable ones are moved to a nearby seek point that lands on them, or
//! folded into the previous line.

use tracing::{debug, info, warn};

use crate::domain::model::Line;
use crate::engine::progress::{CancellationToken, ProgressTracker};
use crate::error::{D2vError, D2vResult};
use crate::ports::{OffsetTranslator, Packet, PacketSource};

/// What the verifier changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    /// (old position, new position) of relocated lines
    pub relocated: Vec<(i64, i64)>,
    /// Positions of lines merged into their predecessor
    pub merged: Vec<i64>,
    /// First line was forced to position 0
    pub forced_first: bool,
}

impl VerificationReport {
    pub fn is_unchanged(&self) -> bool {
        self.relocated.is_empty() && self.merged.is_empty() && !self.forced_first
    }
}

pub struct KeyframeVerifier<'a, S: PacketSource + ?Sized> {
    source: &'a mut S,
    video_stream_id: i32,
}

impl<'a, S: PacketSource + ?Sized> KeyframeVerifier<'a, S> {
    pub fn new(source: &'a mut S, video_stream_id: i32) -> Self {
        Self {
            source,
            video_stream_id,
        }
    }

    /// Position of the first video packet found when demuxing from `offset`
    fn probe(&mut self, offset: i64) -> D2vResult<Option<i64>> {
        self.source.open_at(offset)?;
        while let Some(packet) = self.source.next_packet()? {
            if let Packet::Video(video) = packet {
                if video.stream_id == self.video_stream_id {
                    return Ok(Some(video.position));
                }
            }
        }
        Ok(None)
    }

    /// Binary search `(lower, target)` for a seek point that lands on `target`
    fn search(&mut self, lower: i64, target: i64) -> D2vResult<Option<i64>> {
        let mut minimum = lower;
        let mut maximum = target;

        while maximum - minimum > 1 {
            let middle = minimum + (maximum - minimum) / 2;

            match self.probe(middle)? {
                Some(position) if position == target => return Ok(Some(middle)),
                Some(position) if position < target => minimum = middle,
                // Past the target, or nothing found at all
                _ => maximum = middle,
            }
        }

        Ok(None)
    }

    /// Verify every line in place. Positions stay in span coordinates.
    pub fn verify(
        &mut self,
        lines: &mut Vec<Line>,
        cancel: &CancellationToken,
        progress: &ProgressTracker,
    ) -> D2vResult<VerificationReport> {
        let mut report = VerificationReport::default();
        let mut i = 0;

        while i < lines.len() {
            progress.update(i as i64, lines.len() as i64);

            if cancel.is_cancelled() {
                return Err(D2vError::Cancelled);
            }

            let target = lines[i].byte_position;
            if self.probe(target)? == Some(target) {
                i += 1;
                continue;
            }

            let previous = if i > 0 { lines[i - 1].byte_position } else { -1 };

            if let Some(seek_point) = self.search(previous, target)? {
                let message = format!(
                    "Moving keyframe location {} to {} ({} bytes).",
                    target,
                    seek_point,
                    target - seek_point
                );
                info!(line = i, from = target, to = seek_point, "Moving keyframe location");
                progress.message(&message);

                lines[i].byte_position = seek_point;
                report.relocated.push((target, seek_point));
                i += 1;
                continue;
            }

            if i == 0 {
                let mut message =
                    "Location of first keyframe is unreachable. This should have been impossible."
                        .to_string();
                if target != 0 {
                    message.push_str(&format!(
                        " Moving it from {} to 0 even though it's probably pointless.",
                        target
                    ));
                    lines[0].byte_position = 0;
                    report.forced_first = true;
                }
                warn!(position = target, "Location of first keyframe is unreachable");
                progress.message(&message);
                i += 1;
                continue;
            }

            warn!(line = i, position = target, "Fixing unreachable keyframe location");
            progress.message(&format!("Fixing unreachable keyframe location {}.", target));

            let removed = lines.remove(i);
            lines[i - 1].pictures.extend(removed.pictures);
            report.merged.push(target);
        }

        progress.update(lines.len() as i64, lines.len() as i64);
        debug!(
            relocated = report.relocated.len(),
            merged = report.merged.len(),
            "Keyframe verification finished"
        );

        Ok(report)
    }
}

/// Convert span positions into (file index, in-file offset).
///
/// Positions the translator cannot place are left untouched.
pub fn translate_positions(lines: &mut [Line], translator: &dyn OffsetTranslator) {
    for line in lines.iter_mut() {
        match translator.translate(line.byte_position) {
            Some((file_index, offset)) => {
                line.file_index = file_index;
                line.byte_position = offset;
            }
            None => {
                warn!(position = line.byte_position, "Keyframe position is outside the input files");
            }
        }
    }
}
