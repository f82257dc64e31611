// Domain rules - Picture classification and line bookkeeping policies

use crate::domain::model::*;

/// Computes per-picture flag bytes and the line-level side effects of
/// classifying a picture.
pub struct FlagClassifier;

impl FlagClassifier {
    /// Signalling flags that depend only on the descriptor itself
    pub fn signalling_flags(descriptor: &PictureDescriptor, family: CodecFamily) -> u8 {
        let mut flags = match descriptor.coding_type {
            CodingType::I => picture_flags::I,
            CodingType::P => picture_flags::P,
            CodingType::B => picture_flags::B,
            CodingType::Unknown(_) => 0,
        };

        let progressive = if family.is_mpeg12() {
            Self::is_progressive(descriptor)
        } else {
            descriptor.picture_structure == PictureStructure::Frame && descriptor.progressive_frame
        };
        if progressive {
            flags |= picture_flags::PROGRESSIVE;
        }

        if descriptor.repeat_field_count > 1 {
            flags |= picture_flags::RFF;
        }

        if descriptor.picture_structure == PictureStructure::Frame
            && (descriptor.top_field_first || descriptor.repeat_field_count == 5)
        {
            flags |= picture_flags::TFF;
        }

        flags
    }

    /// Frame doubling and tripling only happen in progressive sequences
    pub fn implies_progressive_sequence(descriptor: &PictureDescriptor) -> bool {
        descriptor.progressive_sequence
            || descriptor.repeat_field_count == 3
            || descriptor.repeat_field_count == 5
    }

    fn is_progressive(descriptor: &PictureDescriptor) -> bool {
        descriptor.progressive_frame || Self::implies_progressive_sequence(descriptor)
    }

    /// Classify a picture that is about to be appended to `line`.
    ///
    /// Must be called after the keyframe bookkeeping for the descriptor has
    /// opened its line. Clears the line's closed GOP bit when an open GOP
    /// turns out to start with B pictures that need the previous GOP.
    pub fn classify(descriptor: &PictureDescriptor, family: CodecFamily, line: &mut Line) -> u8 {
        let mut flags = Self::signalling_flags(descriptor, family);

        if descriptor.is_keyframe {
            flags |= picture_flags::DECODABLE_WITHOUT_PREVIOUS_GOP;
        }

        if family.is_mpeg12() {
            match descriptor.coding_type {
                CodingType::I | CodingType::P => {
                    flags |= picture_flags::DECODABLE_WITHOUT_PREVIOUS_GOP;
                }
                CodingType::B => {
                    if line.is_closed_gop()
                        || Self::reference_count(&line.pictures) >= 2
                    {
                        flags |= picture_flags::DECODABLE_WITHOUT_PREVIOUS_GOP;
                    } else {
                        line.info &= !line_info::CLOSED_GOP;
                    }
                }
                CodingType::Unknown(_) => {}
            }

            if Self::implies_progressive_sequence(descriptor) {
                line.info |= line_info::PROGRESSIVE_SEQUENCE;
            }
        }

        flags
    }

    /// Number of I and P pictures already in the line
    pub fn reference_count(pictures: &[Picture]) -> usize {
        pictures.iter().filter(|p| p.is_reference()).count()
    }
}

/// How pictures of a sealed line are put back into output order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderStrategy {
    None,
    /// MPEG-1/2: one pass of adjacent swaps moving B pictures in front of
    /// the reference picture they follow in coded order
    BubbleSwapLeadingB,
    /// H.264: merge field pairs while aggregating, sort by output number
    /// when sealing
    FieldPairMerge,
}

impl ReorderStrategy {
    pub fn for_codec(family: CodecFamily) -> Self {
        match family {
            CodecFamily::Mpeg1 | CodecFamily::Mpeg2 => ReorderStrategy::BubbleSwapLeadingB,
            CodecFamily::H264 => ReorderStrategy::FieldPairMerge,
        }
    }

    /// Reorder a line's pictures in place just before it is sealed
    pub fn reorder(&self, pictures: &mut [Picture]) {
        match self {
            ReorderStrategy::None => {}
            ReorderStrategy::BubbleSwapLeadingB => {
                for i in 1..pictures.len() {
                    if !pictures[i - 1].is_b() && pictures[i].is_b() {
                        pictures.swap(i - 1, i);
                    }
                }
            }
            ReorderStrategy::FieldPairMerge => {
                pictures.sort_by_key(|p| p.decode_order_number.unwrap_or(i64::MAX));
            }
        }
    }

    /// Fold an incoming field into the previous field of the line.
    ///
    /// Returns true when the incoming picture completed a field pair and must
    /// not be appended on its own.
    pub fn merge_field(&self, pictures: &mut [Picture], incoming: &PictureDescriptor) -> bool {
        if *self != ReorderStrategy::FieldPairMerge || !incoming.picture_structure.is_field() {
            return false;
        }

        let previous = match pictures.last_mut() {
            Some(previous) => previous,
            None => return false,
        };

        let consecutive = match (previous.decode_order_number, incoming.decode_order_number) {
            (Some(prev), Some(next)) => prev == next - 1,
            _ => false,
        };

        if !previous.picture_structure.is_field() || !consecutive {
            return false;
        }

        if incoming.picture_structure == PictureStructure::TopField {
            previous.flags &= !picture_flags::TFF;
        } else {
            previous.flags |= picture_flags::TFF;
        }
        // Coded fields never repeat
        previous.flags &= !picture_flags::RFF;
        previous.picture_structure = PictureStructure::Frame;

        true
    }
}

/// Chooses the colour matrix recorded for a line
pub struct MatrixSelector;

impl MatrixSelector {
    pub fn select(hint: Option<u8>, width: i32, height: i32) -> u8 {
        match hint {
            Some(code) if code != matrix::UNSPECIFIED && code != matrix::RESERVED => code,
            _ => Self::default_for_size(width, height),
        }
    }

    /// HD material defaults to BT.709, everything else to BT.470BG
    pub fn default_for_size(width: i32, height: i32) -> u8 {
        if width > 720 || height > 576 {
            matrix::BT709
        } else {
            matrix::BT470BG
        }
    }
}

/// Guesses a frame rate from presentation timestamps, for containers that
/// report nonsense.
#[derive(Debug, Clone, Default)]
pub struct FrameRateGuesser {
    anchor_pts: Option<i64>,
    guess: Option<Rational>,
}

impl FrameRateGuesser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, pts: Option<i64>, time_base: Rational) {
        if self.guess.is_some() {
            return;
        }
        let pts = match pts {
            Some(pts) => pts,
            None => return,
        };
        let anchor = match self.anchor_pts {
            Some(anchor) => anchor,
            None => {
                self.anchor_pts = Some(pts);
                return;
            }
        };

        let delta = match pts.checked_sub(anchor) {
            Some(delta) => delta,
            None => return,
        };
        if delta <= 0 || !time_base.is_valid() {
            return;
        }

        // frame rate = 1 / (delta * time_base)
        let duration = match delta.checked_mul(time_base.num as i64) {
            Some(duration) => duration,
            None => return,
        };
        let (rate, _) = Rational::reduce(time_base.den as i64, duration, i32::MAX as i64);
        if rate.is_valid() && rate.as_f64() < 130.0 {
            self.guess = Some(rate);
        }
    }

    pub fn guess(&self) -> Option<Rational> {
        self.guess
    }
}

/// Fallback used when neither the container nor the timestamps give a rate
pub const FALLBACK_FRAME_RATE: Rational = Rational::new(42, 1);

/// Derives the D2V settings block from what the container reports
pub struct SettingsResolver;

impl SettingsResolver {
    pub fn resolve(
        container: &ContainerInfo,
        video: &StreamInfo,
        family: CodecFamily,
        colour_range: ColourRange,
        guessed_frame_rate: Option<Rational>,
    ) -> StreamSettings {
        let stream_type = container.stream_type();

        let (transport_pids, transport_packet_size) = if stream_type == StreamType::Transport {
            let audio_id = container.audio_streams().next().map(|s| s.id).unwrap_or(0);
            (
                Some((video.id, audio_id)),
                Some(container.transport_packet_size.unwrap_or(0)),
            )
        } else {
            (None, None)
        };

        StreamSettings {
            stream_type,
            mpeg_type: family.mpeg_type(),
            transport_pids,
            transport_packet_size,
            colour_range,
            aspect_ratio: Self::display_aspect_ratio(video.width, video.height, video.sample_aspect_ratio),
            width: video.width,
            height: video.height,
            frame_rate: Self::frame_rate(video.frame_rate, guessed_frame_rate),
        }
    }

    /// (width / height) * sample aspect ratio, terms at most 1024
    pub fn display_aspect_ratio(width: i32, height: i32, sar: Rational) -> Rational {
        let sar = if sar.is_valid() { sar } else { Rational::new(1, 1) };
        let (dar, _) = Rational::reduce(
            width as i64 * sar.num as i64,
            height as i64 * sar.den as i64,
            1024,
        );
        dar
    }

    pub fn frame_rate(reported: Rational, guessed: Option<Rational>) -> Rational {
        if reported.is_valid() {
            return reported;
        }
        match guessed {
            Some(rate) if rate.is_valid() => rate,
            _ => FALLBACK_FRAME_RATE,
        }
    }
}

#[cfg(test)]
mod tests;
