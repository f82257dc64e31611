//! Indexing job orchestration
//!
//! One job runs the audio delay pre-pass, aggregates pictures into GOP
//! lines, verifies keyframe reachability and writes the D2V document.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub mod progress;

pub use progress::{
    CancellationToken, ConsoleProgressCallback, JsonProgressCallback, NoOpProgressCallback,
    ProgressCallback, ProgressPhase, ProgressTracker,
};

use crate::adapters::multi_file::SpanLayout;
use crate::domain::model::*;
use crate::domain::rules::SettingsResolver;
use crate::error::{D2vError, D2vResult};
use crate::index::keyframe_verifier::translate_positions;
use crate::index::{D2vIndex, GopLineAggregator, KeyframeVerifier, VerificationReport};
use crate::output::D2vWriter;
use crate::ports::{Packet, PacketSource};
use crate::streams::AudioDelayCalculator;

/// Per-job settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Video stream to index; the first video stream when unset
    pub video_stream_id: Option<i32>,
    /// Audio streams to measure; every audio stream when unset
    pub audio_stream_ids: Option<Vec<i32>>,
    pub colour_range: ColourRange,
    pub verify_keyframes: bool,
    /// Input names as written into the header
    pub file_names: Vec<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            video_stream_id: None,
            audio_stream_ids: None,
            colour_range: ColourRange::Limited,
            verify_keyframes: true,
            file_names: Vec::new(),
        }
    }
}

/// Terminal result of a job plus whatever it produced
#[derive(Debug, Clone)]
pub struct JobReport {
    pub outcome: JobOutcome,
    pub stats: Stats,
    pub audio_delays: AudioDelayMap,
    pub index: Option<D2vIndex>,
    pub settings: Option<StreamSettings>,
    pub verification: Option<VerificationReport>,
    pub video_stream_id: Option<i32>,
}

impl JobReport {
    fn new(outcome: JobOutcome) -> Self {
        Self {
            outcome,
            stats: Stats::default(),
            audio_delays: AudioDelayMap::new(),
            index: None,
            settings: None,
            verification: None,
            video_stream_id: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome == JobOutcome::Finished
    }
}

/// Multi-line summary of the frame statistics
pub fn format_stats(stats: &Stats) -> String {
    format!(
        "Video frames seen:   {}\n    Progressive:     {}\n    Top field first: {}\n    Repeat:          {}",
        stats.video_frames, stats.progressive_frames, stats.tff_frames, stats.rff_frames
    )
}

/// A single indexing run
pub struct IndexJob {
    config: JobConfig,
    cancel: CancellationToken,
    progress: ProgressTracker,
}

impl IndexJob {
    pub fn new(config: JobConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            progress: ProgressTracker::silent(),
        }
    }

    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = ProgressTracker::new(callback);
        self
    }

    pub fn with_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.progress = tracker;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Run the job to a terminal outcome. Never returns an error: failures
    /// end up in [`JobReport::outcome`].
    pub fn run<S, W>(&self, source: &mut S, layout: &SpanLayout, out: W) -> JobReport
    where
        S: PacketSource + ?Sized,
        W: Write,
    {
        let start = Instant::now();
        let mut report = JobReport::new(JobOutcome::Finished);

        match self.execute(source, layout, out, &mut report) {
            Ok(()) => {
                let summary = format_stats(&report.stats);
                info!(
                    video_frames = report.stats.video_frames,
                    progressive = report.stats.progressive_frames,
                    tff = report.stats.tff_frames,
                    rff = report.stats.rff_frames,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Indexing finished"
                );
                self.progress.message(&summary);
                self.progress.complete(&summary);
            }
            Err(D2vError::Cancelled) => {
                warn!("Indexing cancelled");
                report.outcome = JobOutcome::Cancelled;
                self.progress.cancel();
            }
            Err(e) => {
                error!("Indexing failed: {}", e);
                report.outcome = JobOutcome::Error(e.to_string());
                self.progress.error(&e.to_string());
            }
        }

        report
    }

    fn check_cancelled(&self) -> D2vResult<()> {
        if self.cancel.is_cancelled() {
            return Err(D2vError::Cancelled);
        }
        Ok(())
    }

    /// Video stream to index and its codec family
    fn select_video<S: PacketSource + ?Sized>(&self, source: &S) -> D2vResult<(StreamInfo, CodecFamily)> {
        let container = source.container();

        if container.stream_type() == StreamType::Unknown {
            return Err(D2vError::UnsupportedContainer {
                format: container.format_name.clone(),
            });
        }

        let video = match self.config.video_stream_id {
            Some(id) => container
                .stream(id)
                .filter(|s| s.kind == StreamKind::Video)
                .ok_or(D2vError::VideoStreamNotFound { stream_id: id })?,
            None => container.video_streams().next().ok_or(D2vError::NoVideoStream)?,
        };

        let family = source
            .codec_family(video.id)
            .ok_or_else(|| D2vError::UnsupportedCodec {
                codec: video.codec_name.clone(),
            })?;

        Ok((video.clone(), family))
    }

    fn execute<S, W>(
        &self,
        source: &mut S,
        layout: &SpanLayout,
        out: W,
        report: &mut JobReport,
    ) -> D2vResult<()>
    where
        S: PacketSource + ?Sized,
        W: Write,
    {
        let (video, family) = self.select_video(source)?;
        report.video_stream_id = Some(video.id);
        info!(
            stream_id = %format!("{:x}", video.id),
            codec = %video.codec_name,
            container = %source.container().format_name,
            "Indexing video track"
        );

        let span_size = source.span_size();

        // Audio delays
        self.progress.start_phase(ProgressPhase::AudioDelay, span_size);
        report.audio_delays = AudioDelayCalculator::run(
            source,
            video.id,
            self.config.audio_stream_ids.as_deref(),
            &self.cancel,
            &self.progress,
        )?;

        // Aggregation
        self.progress.start_phase(ProgressPhase::Indexing, span_size);
        source.open_at(0)?;
        let mut aggregator = GopLineAggregator::new(family);

        loop {
            self.check_cancelled()?;

            let packet = match source.next_packet()? {
                Some(packet) => packet,
                None => break,
            };
            self.progress.update(packet.position(), span_size);

            let picture = match packet {
                Packet::Video(video_packet) if video_packet.stream_id == video.id => {
                    match video_packet.picture {
                        Some(picture) => picture,
                        None => continue,
                    }
                }
                _ => continue,
            };

            if let Err(reason) = aggregator.feed(&picture) {
                debug!(position = picture.byte_position, "{}", reason);
                self.progress
                    .message(&format!("{} at byte {}.", reason, picture.byte_position));
            }
        }

        let guessed_frame_rate = aggregator.guessed_frame_rate();
        let mut lines = aggregator.finish();
        info!(lines = lines.len(), "Aggregated GOP lines");

        if lines.is_empty() {
            warn!("No video frames found");
            self.progress.message("No video frames found.");
            report.index = Some(D2vIndex::new(lines));
            return Ok(());
        }

        // Keyframe verification
        if self.config.verify_keyframes {
            self.progress
                .start_phase(ProgressPhase::Verifying, lines.len() as i64);
            let mut verifier = KeyframeVerifier::new(source, video.id);
            let verification = verifier.verify(&mut lines, &self.cancel, &self.progress)?;
            report.verification = Some(verification);
            source.open_at(0)?;
        }

        if layout.file_count() > 1 {
            translate_positions(&mut lines, layout);
        }

        let settings = SettingsResolver::resolve(
            source.container(),
            &video,
            family,
            self.config.colour_range,
            guessed_frame_rate,
        );
        debug!(?settings, "Resolved stream settings");

        // Output
        self.progress
            .start_phase(ProgressPhase::Writing, lines.len() as i64);
        let mut writer = D2vWriter::new(out);
        writer.write_header(family, &self.config.file_names)?;
        writer.write_settings(&settings)?;
        for (i, line) in lines.iter().enumerate() {
            self.check_cancelled()?;
            writer.write_line(line)?;
            self.progress.update(i as i64 + 1, lines.len() as i64);
        }
        writer.write_stream_end()?;

        let index = D2vIndex::new(lines);
        report.stats = index.stats();
        report.index = Some(index);
        report.settings = Some(settings);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::progress::tests::TestCallback;
    use crate::ports::{AudioPacket, VideoPacket};

    /// Packets seekable at their own position
    struct ScriptedSource {
        container: ContainerInfo,
        family: CodecFamily,
        packets: Vec<Packet>,
        cursor: usize,
        fail_at: Option<usize>,
    }

    impl ScriptedSource {
        fn new(packets: Vec<Packet>) -> Self {
            let mut audio = StreamInfo::audio(0x80, "ac3");
            audio.time_base = Rational::new(1, 1000);
            let mut commentary = StreamInfo::audio(0x81, "ac3");
            commentary.time_base = Rational::new(1, 1000);
            let mut video = StreamInfo::video(0xe0, "mpeg2video", 720, 576);
            video.time_base = Rational::new(1, 1000);
            video.frame_rate = Rational::new(25, 1);
            Self {
                container: ContainerInfo {
                    format_name: "mpeg".to_string(),
                    transport_packet_size: None,
                    streams: vec![video, audio, commentary],
                },
                family: CodecFamily::Mpeg2,
                packets,
                cursor: 0,
                fail_at: None,
            }
        }

        fn h264(packets: Vec<Packet>) -> Self {
            let mut source = Self::new(packets);
            source.container.streams[0].codec_name = "h264".to_string();
            source.family = CodecFamily::H264;
            source
        }
    }

    impl PacketSource for ScriptedSource {
        fn container(&self) -> &ContainerInfo {
            &self.container
        }

        fn codec_family(&self, id: i32) -> Option<CodecFamily> {
            (id == 0xe0).then_some(self.family)
        }

        fn span_size(&self) -> i64 {
            self.packets.last().map_or(0, |p| p.position() + 1)
        }

        fn open_at(&mut self, offset: i64) -> D2vResult<()> {
            self.cursor = self
                .packets
                .iter()
                .position(|p| p.position() >= offset)
                .unwrap_or(self.packets.len());
            Ok(())
        }

        fn next_packet(&mut self) -> D2vResult<Option<Packet>> {
            if self.fail_at == Some(self.cursor) {
                return Err(D2vError::DecodeError {
                    stream_id: 0x80,
                    message: "corrupt packet".to_string(),
                });
            }
            let packet = self.packets.get(self.cursor).cloned();
            self.cursor += 1;
            Ok(packet)
        }
    }

    fn video(picture: PictureDescriptor) -> Packet {
        Packet::Video(VideoPacket {
            stream_id: 0xe0,
            position: picture.byte_position,
            picture: Some(picture),
        })
    }

    fn audio(position: i64, pts: i64) -> Packet {
        Packet::Audio(AudioPacket {
            stream_id: 0x80,
            position,
            pts: Some(pts),
            time_base: Rational::new(1, 1000),
        })
    }

    fn packets() -> Vec<Packet> {
        vec![
            audio(0, 80),
            video(PictureDescriptor::keyframe(10).with_closed_gop(true).with_pts(120)),
            video(PictureDescriptor::new(CodingType::P, 20).with_pts(240)),
            audio(30, 200),
            video(PictureDescriptor::new(CodingType::B, 40).with_pts(160)),
            video(PictureDescriptor::keyframe(50).with_pts(320)),
            video(PictureDescriptor::new(CodingType::B, 60).with_pts(280)),
            audio(70, 400),
        ]
    }

    fn layout() -> SpanLayout {
        SpanLayout::new(vec!["in.vob".into()], vec![80])
    }

    fn config() -> JobConfig {
        JobConfig {
            file_names: vec!["/dvd/in.vob".to_string()],
            ..JobConfig::default()
        }
    }

    #[test]
    fn test_job_writes_index_and_reports() {
        let mut source = ScriptedSource::new(packets());
        let mut out = Vec::new();
        let report = IndexJob::new(config()).run(&mut source, &layout(), &mut out);

        assert_eq!(report.outcome, JobOutcome::Finished);
        assert_eq!(report.stats.video_frames, 5);
        assert_eq!(report.audio_delays[&0x80], AudioDelay::Known(80));
        assert!(report.verification.unwrap().is_unchanged());

        let index = report.index.unwrap();
        assert_eq!(index.lines().len(), 2);
        assert_eq!(index.gop_start_position(3), Some(50));

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("DGIndexProjectFile16\n1\n/dvd/in.vob\n\nStream_Type=1\n"));
        assert!(text.contains("Frame_Rate=25000 (25/1)\n"));
        assert!(text.ends_with("\nd00 5 0 10 0 0 0 90 b0 a0\n900 5 0 50 0 0 0 30 90 ff\n"));
    }

    #[test]
    fn test_h264_job_writes_version_42_document() {
        let field = |structure: PictureStructure, coding_type: CodingType, position: i64, number: i64| {
            PictureDescriptor::new(coding_type, position)
                .with_structure(structure)
                .with_decode_order(number)
        };
        let frame = |coding_type: CodingType, position: i64, number: i64, pts: i64| {
            let mut picture = PictureDescriptor::new(coding_type, position)
                .with_decode_order(number)
                .with_pts(pts);
            picture.top_field_first = true;
            picture
        };
        let mut progressive_key = PictureDescriptor::keyframe(50).with_decode_order(6).with_pts(320);
        progressive_key.progressive_frame = true;
        let mut progressive_b = PictureDescriptor::new(CodingType::B, 60).with_decode_order(5).with_pts(280);
        progressive_b.progressive_frame = true;

        let mut top_key = field(PictureStructure::TopField, CodingType::I, 10, 0).with_pts(120);
        top_key.is_keyframe = true;

        let mut source = ScriptedSource::h264(vec![
            audio(0, 80),
            // Field pair making up the first keyframe
            video(top_key),
            video(field(PictureStructure::BottomField, CodingType::P, 20, 1)),
            video(frame(CodingType::P, 30, 4, 240)),
            audio(35, 200),
            video(frame(CodingType::B, 40, 2, 160)),
            video(progressive_key),
            video(progressive_b),
            audio(70, 400),
        ]);

        let mut out = Vec::new();
        let report = IndexJob::new(config()).run(&mut source, &layout(), &mut out);

        assert_eq!(report.outcome, JobOutcome::Finished);
        assert_eq!(report.audio_delays[&0x80], AudioDelay::Known(80));
        assert!(report.verification.unwrap().is_unchanged());
        assert_eq!(
            report.stats,
            Stats {
                video_frames: 5,
                progressive_frames: 2,
                tff_frames: 3,
                rff_frames: 0,
            }
        );

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("DGIndexProjectFile42\n1\n/dvd/in.vob\n\nStream_Type=1\nMPEG_Type=264\n"));
        assert!(text.ends_with("\n900 5 0 10 0 0 0 92 32 22\n900 5 0 50 0 0 0 70 d0 ff\n"));
    }

    #[test]
    fn test_cancelled_job() {
        let mut source = ScriptedSource::new(packets());
        let token = CancellationToken::new();
        token.cancel();
        let callback = TestCallback::new();

        let report = IndexJob::new(config())
            .with_cancellation(token)
            .with_progress(callback.clone())
            .run(&mut source, &layout(), Vec::new());

        assert_eq!(report.outcome, JobOutcome::Cancelled);
        assert!(callback.cancelled.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn test_audio_filter_limits_measured_streams() {
        let mut source = ScriptedSource::new(packets());
        let job = IndexJob::new(JobConfig {
            audio_stream_ids: Some(vec![0x81]),
            ..config()
        });
        let report = job.run(&mut source, &layout(), Vec::new());

        assert!(report.is_finished());
        assert_eq!(report.audio_delays.len(), 1);
        assert_eq!(report.audio_delays[&0x81], AudioDelay::Unknown);
        assert_eq!(report.stats.video_frames, 5);
    }

    #[test]
    fn test_missing_audio_track_fails_before_indexing() {
        let mut source = ScriptedSource::new(packets());
        let job = IndexJob::new(JobConfig {
            audio_stream_ids: Some(vec![0x80, 0x82, 0xbd]),
            ..config()
        });
        let report = job.run(&mut source, &layout(), Vec::new());

        assert_eq!(
            report.outcome,
            JobOutcome::Error(
                "Couldn't find audio track with id 82.\nCouldn't find audio track with id bd."
                    .to_string()
            )
        );
        assert!(report.index.is_none());
    }

    #[test]
    fn test_decode_error_becomes_error_outcome() {
        let mut source = ScriptedSource::new(packets());
        source.fail_at = Some(3);

        let report = IndexJob::new(config()).run(&mut source, &layout(), Vec::new());
        match report.outcome {
            JobOutcome::Error(message) => assert!(message.contains("80"), "{}", message),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_missing_video_track() {
        let mut source = ScriptedSource::new(packets());
        let job = IndexJob::new(JobConfig {
            video_stream_id: Some(0x1e1),
            ..config()
        });
        let report = job.run(&mut source, &layout(), Vec::new());
        assert_eq!(
            report.outcome,
            JobOutcome::Error("Couldn't find video track with id 1e1.".to_string())
        );
    }

    #[test]
    fn test_skipped_pictures_are_forwarded_to_log_callback() {
        let mut packets = packets();
        packets.insert(0, video(PictureDescriptor::new(CodingType::P, 0)));
        let mut source = ScriptedSource::new(packets);
        let callback = TestCallback::new();

        let report = IndexJob::new(config())
            .with_progress(callback.clone())
            .run(&mut source, &layout(), Vec::new());

        assert!(report.is_finished());
        assert!(callback.messages().iter().any(|m| m.ends_with("at byte 0.")));
        assert!(callback.messages().last().unwrap().starts_with("Video frames seen:   5"));
    }

    #[test]
    fn test_multi_file_positions_are_translated() {
        let mut source = ScriptedSource::new(packets());
        let layout = SpanLayout::new(vec!["a.vob".into(), "b.vob".into()], vec![45, 35]);
        let report = IndexJob::new(config()).run(&mut source, &layout, Vec::new());

        let index = report.index.unwrap();
        assert_eq!(index.lines()[1].file_index, 1);
        assert_eq!(index.lines()[1].byte_position, 5);
    }

    #[test]
    fn test_stats_format() {
        let stats = Stats {
            video_frames: 10,
            progressive_frames: 2,
            tff_frames: 3,
            rff_frames: 4,
        };
        assert_eq!(
            format_stats(&stats),
            "Video frames seen:   10\n    Progressive:     2\n    Top field first: 3\n    Repeat:          4"
        );
    }
}
