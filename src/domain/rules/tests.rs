// Unit tests for domain rules

#[cfg(test)]
mod tests {
    use crate::domain::model::*;
    use crate::domain::rules::*;

    fn open_line(closed: bool) -> Line {
        let mut info = line_info::BIT11 | line_info::STARTS_NEW_GOP;
        if closed {
            info |= line_info::CLOSED_GOP;
        }
        Line::open(info, matrix::BT470BG, 0)
    }

    /// Classify and append, the way the aggregator does
    fn push(line: &mut Line, descriptor: PictureDescriptor) -> u8 {
        let flags = FlagClassifier::classify(&descriptor, CodecFamily::Mpeg2, line);
        line.pictures.push(Picture::new(flags));
        flags
    }

    #[test]
    fn test_reference_pictures_are_decodable() {
        let mut line = open_line(false);
        let i = push(&mut line, PictureDescriptor::keyframe(0));
        let p = push(&mut line, PictureDescriptor::new(CodingType::P, 10));
        assert_eq!(i & picture_flags::TYPE_MASK, picture_flags::I);
        assert_eq!(p & picture_flags::TYPE_MASK, picture_flags::P);
        assert!(Picture::new(i).is_decodable_without_previous_gop());
        assert!(Picture::new(p).is_decodable_without_previous_gop());
    }

    #[test]
    fn test_closed_gop_short_circuits_reference_count() {
        let mut line = open_line(true);
        push(&mut line, PictureDescriptor::keyframe(0).with_closed_gop(true));
        let b1 = push(&mut line, PictureDescriptor::new(CodingType::B, 10));
        let b2 = push(&mut line, PictureDescriptor::new(CodingType::B, 20));
        assert!(Picture::new(b1).is_decodable_without_previous_gop());
        assert!(Picture::new(b2).is_decodable_without_previous_gop());
        assert!(line.is_closed_gop());
    }

    #[test]
    fn test_open_gop_b_after_two_references_is_decodable() {
        let mut line = open_line(false);
        push(&mut line, PictureDescriptor::keyframe(0));
        push(&mut line, PictureDescriptor::new(CodingType::P, 10));
        let b1 = push(&mut line, PictureDescriptor::new(CodingType::B, 20));
        let b2 = push(&mut line, PictureDescriptor::new(CodingType::B, 30));
        assert!(Picture::new(b1).is_decodable_without_previous_gop());
        assert!(Picture::new(b2).is_decodable_without_previous_gop());
    }

    #[test]
    fn test_open_gop_leading_b_clears_closed_bit() {
        let mut line = open_line(false);
        push(&mut line, PictureDescriptor::keyframe(0));
        let b1 = push(&mut line, PictureDescriptor::new(CodingType::B, 10));
        assert!(!Picture::new(b1).is_decodable_without_previous_gop());
        assert!(!line.is_closed_gop());
    }

    #[test]
    fn test_h264_b_pictures_are_never_marked() {
        let mut line = open_line(false);
        let key = FlagClassifier::classify(&PictureDescriptor::keyframe(0), CodecFamily::H264, &mut line);
        line.pictures.push(Picture::new(key));
        let p = FlagClassifier::classify(&PictureDescriptor::new(CodingType::P, 5), CodecFamily::H264, &mut line);
        assert!(Picture::new(key).is_decodable_without_previous_gop());
        assert!(!Picture::new(p).is_decodable_without_previous_gop());
    }

    #[test]
    fn test_repeat_signalling() {
        let mut line = open_line(false);
        let rff = push(&mut line, PictureDescriptor::keyframe(0).with_repeat(2));
        assert!(Picture::new(rff).repeats_field());
        assert!(!Picture::new(rff).is_progressive());
        assert!(!line.is_progressive_sequence());

        let tripled = push(&mut line, PictureDescriptor::new(CodingType::P, 10).with_repeat(5));
        let tripled = Picture::new(tripled);
        assert!(tripled.repeats_field());
        assert!(tripled.is_top_field_first());
        assert!(tripled.is_progressive());
        assert!(line.is_progressive_sequence());
    }

    #[test]
    fn test_top_field_first_needs_frame_structure() {
        let mut descriptor = PictureDescriptor::keyframe(0).with_structure(PictureStructure::TopField);
        descriptor.top_field_first = true;
        let flags = FlagClassifier::signalling_flags(&descriptor, CodecFamily::Mpeg2);
        assert_eq!(flags & picture_flags::TFF, 0);

        descriptor.picture_structure = PictureStructure::Frame;
        let flags = FlagClassifier::signalling_flags(&descriptor, CodecFamily::Mpeg2);
        assert_ne!(flags & picture_flags::TFF, 0);
    }

    #[test]
    fn test_bubble_swap_moves_b_before_reference() {
        let i = Picture::new(picture_flags::I);
        let p = Picture::new(picture_flags::P);
        let b = Picture::new(picture_flags::B);

        let mut pictures = vec![i, p, b, b];
        ReorderStrategy::BubbleSwapLeadingB.reorder(&mut pictures);
        assert_eq!(pictures, vec![i, b, b, p]);

        let mut pictures = vec![i, b, b, p, b, b];
        ReorderStrategy::BubbleSwapLeadingB.reorder(&mut pictures);
        assert_eq!(pictures, vec![b, b, i, b, b, p]);

        // A B run is only carried past one reference per pass
        let mut pictures = vec![i, p, p, b];
        ReorderStrategy::BubbleSwapLeadingB.reorder(&mut pictures);
        assert_eq!(pictures, vec![i, p, b, p]);
    }

    #[test]
    fn test_no_reorder_keeps_order() {
        let mut pictures = vec![Picture::new(picture_flags::I), Picture::new(picture_flags::B)];
        let before = pictures.clone();
        ReorderStrategy::None.reorder(&mut pictures);
        assert_eq!(pictures, before);
    }

    #[test]
    fn test_field_pair_sort_by_output_number() {
        let mut pictures: Vec<Picture> = [2, 0, 1]
            .iter()
            .map(|n| Picture {
                flags: picture_flags::P,
                decode_order_number: Some(*n),
                picture_structure: PictureStructure::Frame,
            })
            .collect();
        ReorderStrategy::FieldPairMerge.reorder(&mut pictures);
        let order: Vec<_> = pictures.iter().map(|p| p.decode_order_number).collect();
        assert_eq!(order, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn test_field_pair_merge() {
        let mut pictures = vec![Picture {
            flags: picture_flags::I | picture_flags::RFF,
            decode_order_number: Some(4),
            picture_structure: PictureStructure::BottomField,
        }];

        let top = PictureDescriptor::new(CodingType::I, 100)
            .with_structure(PictureStructure::TopField)
            .with_decode_order(5);
        assert!(ReorderStrategy::FieldPairMerge.merge_field(&mut pictures, &top));
        assert_eq!(pictures.len(), 1);
        assert_eq!(pictures[0].picture_structure, PictureStructure::Frame);
        assert!(!pictures[0].is_top_field_first());
        assert!(!pictures[0].repeats_field());
    }

    #[test]
    fn test_field_pair_merge_requires_consecutive_numbers() {
        let mut pictures = vec![Picture {
            flags: picture_flags::I,
            decode_order_number: Some(4),
            picture_structure: PictureStructure::TopField,
        }];
        let bottom = PictureDescriptor::new(CodingType::I, 100)
            .with_structure(PictureStructure::BottomField)
            .with_decode_order(6);
        assert!(!ReorderStrategy::FieldPairMerge.merge_field(&mut pictures, &bottom));
        assert!(!ReorderStrategy::BubbleSwapLeadingB.merge_field(&mut pictures, &bottom));

        let bottom = bottom.with_decode_order(5);
        assert!(ReorderStrategy::FieldPairMerge.merge_field(&mut pictures, &bottom));
        assert!(pictures[0].is_top_field_first());
    }

    #[test]
    fn test_matrix_selection() {
        assert_eq!(MatrixSelector::select(Some(6), 720, 480), 6);
        assert_eq!(MatrixSelector::select(None, 720, 576), matrix::BT470BG);
        assert_eq!(MatrixSelector::select(Some(matrix::UNSPECIFIED), 1920, 1080), matrix::BT709);
        assert_eq!(MatrixSelector::select(Some(matrix::RESERVED), 720, 577), matrix::BT709);
    }

    #[test]
    fn test_frame_rate_guess() {
        let tb = Rational::new(1, 90000);
        let mut guesser = FrameRateGuesser::new();
        guesser.observe(Some(9000), tb);
        guesser.observe(Some(9000), tb);
        assert_eq!(guesser.guess(), None);
        guesser.observe(Some(12003), tb);
        assert_eq!(guesser.guess(), Some(Rational::new(30000, 1001)));

        // Locked after the first accepted guess
        guesser.observe(Some(12004), tb);
        assert_eq!(guesser.guess(), Some(Rational::new(30000, 1001)));
    }

    #[test]
    fn test_frame_rate_guess_rejects_implausible_rates() {
        let tb = Rational::new(1, 90000);
        let mut guesser = FrameRateGuesser::new();
        guesser.observe(Some(0), tb);
        guesser.observe(Some(1), tb);
        assert_eq!(guesser.guess(), None);
        guesser.observe(Some(3600), tb);
        assert_eq!(guesser.guess(), Some(Rational::new(25, 1)));
    }

    #[test]
    fn test_frame_rate_guess_skips_overflowing_durations() {
        let tb = Rational::new(1001, 30000);
        let mut guesser = FrameRateGuesser::new();
        guesser.observe(Some(0), tb);
        guesser.observe(Some(i64::MAX / 2), tb);
        assert_eq!(guesser.guess(), None);

        let mut guesser = FrameRateGuesser::new();
        guesser.observe(Some(i64::MIN + 1), tb);
        guesser.observe(Some(i64::MAX), tb);
        assert_eq!(guesser.guess(), None);

        // Later sane samples still produce a guess
        guesser.observe(Some(i64::MIN + 2), tb);
        assert_eq!(guesser.guess(), Some(Rational::new(30000, 1001)));
    }

    #[test]
    fn test_settings_resolution_for_transport_streams() {
        let mut video = StreamInfo::video(0x1011, "mpeg2video", 720, 480);
        video.sample_aspect_ratio = Rational::new(32, 27);
        let container = ContainerInfo {
            format_name: "mpegts".to_string(),
            transport_packet_size: Some(188),
            streams: vec![video.clone(), StreamInfo::audio(0x1100, "ac3")],
        };

        let settings = SettingsResolver::resolve(
            &container,
            &video,
            CodecFamily::Mpeg2,
            ColourRange::Limited,
            None,
        );
        assert_eq!(settings.stream_type, StreamType::Transport);
        assert_eq!(settings.transport_pids, Some((0x1011, 0x1100)));
        assert_eq!(settings.transport_packet_size, Some(188));
        assert_eq!(settings.aspect_ratio, Rational::new(16, 9));
        assert_eq!(settings.frame_rate, FALLBACK_FRAME_RATE);
    }

    #[test]
    fn test_frame_rate_preference() {
        let reported = Rational::new(25, 1);
        let guessed = Some(Rational::new(24000, 1001));
        assert_eq!(SettingsResolver::frame_rate(reported, guessed), reported);
        assert_eq!(SettingsResolver::frame_rate(Rational::default(), guessed), Rational::new(24000, 1001));
        assert_eq!(SettingsResolver::frame_rate(Rational::new(0, 0), None), FALLBACK_FRAME_RATE);
    }

    #[test]
    fn test_invalid_sample_aspect_defaults_to_square() {
        let dar = SettingsResolver::display_aspect_ratio(640, 480, Rational::new(0, 0));
        assert_eq!(dar, Rational::new(4, 3));
    }
}
