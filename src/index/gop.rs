//! GOP line aggregation
//!
//! Turns picture descriptors, fed in decode order, into one [`Line`] per GOP.

use tracing::debug;

use crate::domain::errors::SkipReason;
use crate::domain::model::*;
use crate::domain::rules::{FlagClassifier, FrameRateGuesser, MatrixSelector, ReorderStrategy};

/// Aggregation state: either no GOP has started yet, or one line is open
#[derive(Debug, Clone, PartialEq)]
enum LineState {
    NoLine,
    Open(Line),
}

/// Builds GOP lines from a picture descriptor stream
pub struct GopLineAggregator {
    family: CodecFamily,
    reorder: ReorderStrategy,
    state: LineState,
    lines: Vec<Line>,
    frame_rate: FrameRateGuesser,
}

impl GopLineAggregator {
    /// Create an aggregator using the reorder strategy of the codec family
    pub fn new(family: CodecFamily) -> Self {
        Self {
            family,
            reorder: ReorderStrategy::for_codec(family),
            state: LineState::NoLine,
            lines: Vec::new(),
            frame_rate: FrameRateGuesser::new(),
        }
    }

    /// Override the reorder strategy
    pub fn with_reorder(mut self, reorder: ReorderStrategy) -> Self {
        self.reorder = reorder;
        self
    }

    /// Number of lines sealed so far
    pub fn sealed_lines(&self) -> usize {
        self.lines.len()
    }

    /// Frame rate guessed from timestamps, if any
    pub fn guessed_frame_rate(&self) -> Option<Rational> {
        self.frame_rate.guess()
    }

    fn open_picture_count(&self) -> usize {
        match &self.state {
            LineState::NoLine => 0,
            LineState::Open(line) => line.pictures.len(),
        }
    }

    fn open_line_is_closed(&self) -> bool {
        match &self.state {
            LineState::NoLine => false,
            LineState::Open(line) => line.is_closed_gop(),
        }
    }

    /// Add one picture. Returns why it was dropped, if it was.
    pub fn feed(&mut self, descriptor: &PictureDescriptor) -> Result<(), SkipReason> {
        if descriptor.width <= 0 || descriptor.height <= 0 {
            return Err(SkipReason::InvalidDimensions {
                width: descriptor.width,
                height: descriptor.height,
            });
        }

        if let CodingType::Unknown(code) = descriptor.coding_type {
            return Err(SkipReason::UnknownPictureType(code));
        }

        let first_gop = self.lines.is_empty();
        let pictures_in_line = self.open_picture_count();

        if first_gop && pictures_in_line == 0 && !descriptor.is_keyframe {
            return Err(SkipReason::LeadingNonKeyframe);
        }

        if self.family.is_mpeg12()
            && first_gop
            && !self.open_line_is_closed()
            && pictures_in_line == 1
            && descriptor.coding_type == CodingType::B
        {
            return Err(SkipReason::LeadingBPicture);
        }

        if descriptor.is_keyframe {
            self.seal();

            let mut info = line_info::BIT11 | line_info::STARTS_NEW_GOP;
            if descriptor.closed_gop {
                info |= line_info::CLOSED_GOP;
            }
            let matrix =
                MatrixSelector::select(descriptor.colour_matrix, descriptor.width, descriptor.height);
            self.state = LineState::Open(Line::open(info, matrix, descriptor.byte_position));
        }

        let line = match &mut self.state {
            LineState::Open(line) => line,
            LineState::NoLine => return Err(SkipReason::LeadingNonKeyframe),
        };

        let flags = FlagClassifier::classify(descriptor, self.family, line);

        if self.reorder.merge_field(&mut line.pictures, descriptor) {
            return Ok(());
        }

        self.frame_rate.observe(descriptor.pts, descriptor.time_base);

        line.pictures.push(Picture {
            flags,
            decode_order_number: descriptor.decode_order_number,
            picture_structure: descriptor.picture_structure,
        });

        Ok(())
    }

    /// Reorder the open line and move it to the output list
    fn seal(&mut self) {
        if let LineState::Open(mut line) = std::mem::replace(&mut self.state, LineState::NoLine) {
            if line.is_null() {
                return;
            }
            self.reorder.reorder(&mut line.pictures);
            debug!(
                line = self.lines.len(),
                position = line.byte_position,
                pictures = line.pictures.len(),
                "Sealed GOP line"
            );
            self.lines.push(line);
        }
    }

    /// End of stream: drop an orphan trailing field and seal the last line
    pub fn finish(mut self) -> Vec<Line> {
        if let LineState::Open(line) = &mut self.state {
            if line
                .pictures
                .last()
                .map_or(false, |p| p.picture_structure.is_field())
            {
                debug!("Discarding orphan field at end of stream");
                line.pictures.pop();
            }
        }
        self.seal();
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(aggregator: &mut GopLineAggregator, descriptors: &[PictureDescriptor]) -> Vec<SkipReason> {
        descriptors
            .iter()
            .filter_map(|d| aggregator.feed(d).err())
            .collect()
    }

    fn types(line: &Line) -> Vec<u8> {
        line.pictures
            .iter()
            .map(|p| p.flags & picture_flags::TYPE_MASK)
            .collect()
    }

    #[test]
    fn test_leading_non_keyframe_is_dropped() {
        let mut aggregator = GopLineAggregator::new(CodecFamily::Mpeg2);
        let skipped = feed_all(
            &mut aggregator,
            &[
                PictureDescriptor::new(CodingType::P, 0),
                PictureDescriptor::keyframe(100),
                PictureDescriptor::new(CodingType::P, 200),
            ],
        );
        assert_eq!(skipped, vec![SkipReason::LeadingNonKeyframe]);

        let lines = aggregator.finish();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].byte_position, 100);
        assert_eq!(lines[0].pictures.len(), 2);
    }

    #[test]
    fn test_leading_b_pictures_of_first_open_gop_are_dropped() {
        let mut aggregator = GopLineAggregator::new(CodecFamily::Mpeg2);
        let skipped = feed_all(
            &mut aggregator,
            &[
                PictureDescriptor::keyframe(0),
                PictureDescriptor::new(CodingType::B, 10),
                PictureDescriptor::new(CodingType::P, 20),
                PictureDescriptor::keyframe(30),
                PictureDescriptor::new(CodingType::B, 40),
            ],
        );
        assert_eq!(skipped, vec![SkipReason::LeadingBPicture]);

        let lines = aggregator.finish();
        assert_eq!(lines.len(), 2);
        assert_eq!(types(&lines[0]), vec![picture_flags::I, picture_flags::P]);
        // Only the very first GOP loses its leading B pictures
        assert_eq!(lines[1].pictures.len(), 2);
    }

    #[test]
    fn test_closed_first_gop_keeps_leading_b() {
        let mut aggregator = GopLineAggregator::new(CodecFamily::Mpeg2);
        let skipped = feed_all(
            &mut aggregator,
            &[
                PictureDescriptor::keyframe(0).with_closed_gop(true),
                PictureDescriptor::new(CodingType::B, 10),
            ],
        );
        assert!(skipped.is_empty());
        let lines = aggregator.finish();
        assert!(lines[0].is_closed_gop());
        assert!(lines[0].pictures.iter().all(|p| p.is_decodable_without_previous_gop()));
    }

    #[test]
    fn test_line_fields_on_keyframe() {
        let mut aggregator = GopLineAggregator::new(CodecFamily::Mpeg2);
        feed_all(
            &mut aggregator,
            &[
                PictureDescriptor::keyframe(0).with_dimensions(1920, 1080),
                PictureDescriptor::keyframe(500).with_closed_gop(true),
            ],
        );
        let lines = aggregator.finish();
        assert_eq!(lines[0].info, line_info::BIT11 | line_info::STARTS_NEW_GOP);
        assert_eq!(lines[0].matrix, matrix::BT709);
        assert_eq!(
            lines[1].info,
            line_info::BIT11 | line_info::STARTS_NEW_GOP | line_info::CLOSED_GOP
        );
        assert_eq!(lines[1].matrix, matrix::BT470BG);
        assert_eq!(lines[1].byte_position, 500);
        assert_eq!(lines[1].skip + lines[1].vob + lines[1].cell, 0);
    }

    #[test]
    fn test_invalid_pictures_are_skipped() {
        let mut aggregator = GopLineAggregator::new(CodecFamily::Mpeg2);
        let skipped = feed_all(
            &mut aggregator,
            &[
                PictureDescriptor::keyframe(0).with_dimensions(0, 480),
                PictureDescriptor::keyframe(10),
                PictureDescriptor::new(CodingType::Unknown(4), 20),
            ],
        );
        assert_eq!(
            skipped,
            vec![
                SkipReason::InvalidDimensions { width: 0, height: 480 },
                SkipReason::UnknownPictureType(4),
            ]
        );
        assert_eq!(aggregator.finish()[0].pictures.len(), 1);
    }

    #[test]
    fn test_lines_are_reordered_when_sealed() {
        let mut aggregator = GopLineAggregator::new(CodecFamily::Mpeg2);
        feed_all(
            &mut aggregator,
            &[
                PictureDescriptor::keyframe(0).with_closed_gop(true),
                PictureDescriptor::new(CodingType::P, 10),
                PictureDescriptor::new(CodingType::B, 20),
                PictureDescriptor::new(CodingType::B, 30),
            ],
        );
        let lines = aggregator.finish();
        assert_eq!(
            types(&lines[0]),
            vec![picture_flags::I, picture_flags::B, picture_flags::B, picture_flags::P]
        );
    }

    #[test]
    fn test_h264_field_pairs_and_orphan() {
        let mut aggregator = GopLineAggregator::new(CodecFamily::H264);
        let field = |pos: i64, n: i64, top: bool| {
            let structure = if top {
                PictureStructure::TopField
            } else {
                PictureStructure::BottomField
            };
            PictureDescriptor::new(CodingType::P, pos)
                .with_structure(structure)
                .with_decode_order(n)
        };

        let mut key = PictureDescriptor::keyframe(0)
            .with_structure(PictureStructure::TopField)
            .with_decode_order(0);
        key.repeat_field_count = 2;

        feed_all(
            &mut aggregator,
            &[key, field(10, 1, false), field(20, 2, false), field(30, 3, true), field(40, 4, true)],
        );
        let lines = aggregator.finish();
        let pictures = &lines[0].pictures;
        assert_eq!(pictures.len(), 2);
        assert!(pictures[0].is_top_field_first());
        assert!(!pictures[0].repeats_field());
        assert!(!pictures[1].is_top_field_first());
        assert!(pictures.iter().all(|p| p.picture_structure == PictureStructure::Frame));
    }

    #[test]
    fn test_frame_rate_guess_is_exposed() {
        let mut aggregator = GopLineAggregator::new(CodecFamily::Mpeg2);
        feed_all(
            &mut aggregator,
            &[
                PictureDescriptor::keyframe(0).with_pts(3600),
                PictureDescriptor::new(CodingType::P, 10).with_pts(7200),
            ],
        );
        assert_eq!(aggregator.guessed_frame_rate(), Some(Rational::new(25, 1)));
    }

    #[test]
    fn test_empty_stream_yields_no_lines() {
        let aggregator = GopLineAggregator::new(CodecFamily::Mpeg1);
        assert!(aggregator.finish().is_empty());
    }
}
