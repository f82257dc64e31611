//! Audio delay relative to the first video keyframe

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::domain::model::{AudioDelay, AudioDelayMap, Rational};
use crate::engine::progress::{CancellationToken, ProgressTracker};
use crate::error::{D2vError, D2vResult};
use crate::ports::{AudioPacket, Packet, PacketSource, VideoPacket};

/// `pts` in milliseconds using `time_base`
pub fn pts_to_millis(pts: i64, time_base: Rational) -> Option<i64> {
    if time_base.den == 0 {
        return None;
    }
    let ms = pts as i128 * 1000 * time_base.num as i128 / time_base.den as i128;
    i64::try_from(ms).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BufferedAudio {
    position: i64,
    pts_ms: i64,
}

/// Single forward scan that buffers audio timestamps around the first keyframe
#[derive(Debug)]
pub struct AudioDelayCalculator {
    video_stream_id: i32,
    video_time_base: Rational,
    /// Streams start out unknown
    delays: AudioDelayMap,
    buffers: BTreeMap<i32, Vec<BufferedAudio>>,
    resolved: HashSet<i32>,
    first_keyframe_position: Option<i64>,
    /// Smallest pts between the first two keyframes, in stream units
    first_video_pts: Option<i64>,
    second_keyframe_reached: bool,
}

impl AudioDelayCalculator {
    pub fn new(
        video_stream_id: i32,
        video_time_base: Rational,
        audio_stream_ids: impl IntoIterator<Item = i32>,
    ) -> Self {
        let delays = audio_stream_ids
            .into_iter()
            .map(|id| (id, AudioDelay::Unknown))
            .collect();

        Self {
            video_stream_id,
            video_time_base,
            delays,
            buffers: BTreeMap::new(),
            resolved: HashSet::new(),
            first_keyframe_position: None,
            first_video_pts: None,
            second_keyframe_reached: false,
        }
    }

    /// Byte position of the first video keyframe, once seen
    pub fn first_keyframe_position(&self) -> Option<i64> {
        self.first_keyframe_position
    }

    /// True when further packets cannot change the result
    pub fn is_done(&self) -> bool {
        self.resolved.len() >= self.delays.len() && self.second_keyframe_reached
    }

    pub fn observe(&mut self, packet: &Packet) {
        match packet {
            Packet::Video(video) if video.stream_id == self.video_stream_id => {
                self.observe_video(video)
            }
            Packet::Audio(audio) => self.observe_audio(audio),
            _ => {}
        }
    }

    pub fn observe_video(&mut self, packet: &VideoPacket) {
        let picture = match &packet.picture {
            Some(picture) if picture.width > 0 && picture.height > 0 => picture,
            _ => return,
        };

        if picture.is_keyframe {
            if self.first_keyframe_position.is_none() {
                self.first_keyframe_position = Some(packet.position);
                self.first_video_pts = picture.pts;
            } else {
                self.second_keyframe_reached = true;
            }
        } else if self.first_keyframe_position.is_some() && !self.second_keyframe_reached {
            // The first keyframe is not always the first picture displayed
            if let Some(pts) = picture.pts {
                if self.first_video_pts.map_or(true, |first| pts < first) {
                    self.first_video_pts = Some(pts);
                }
            }
        }
    }

    pub fn observe_audio(&mut self, packet: &AudioPacket) {
        if !self.delays.contains_key(&packet.stream_id) {
            return;
        }
        let pts_ms = match packet.pts.and_then(|pts| pts_to_millis(pts, packet.time_base)) {
            Some(ms) => ms,
            None => return,
        };

        let buffer = self.buffers.entry(packet.stream_id).or_default();
        let entry = BufferedAudio {
            position: packet.position,
            pts_ms,
        };

        let keyframe_position = match self.first_keyframe_position {
            Some(position) => position,
            None => {
                buffer.push(entry);
                return;
            }
        };

        // Packets do not arrive sorted by position across streams, so a
        // stream is only settled once its buffer reaches the keyframe.
        match buffer.last() {
            Some(last) if last.position >= keyframe_position => {
                self.resolved.insert(packet.stream_id);
            }
            _ => buffer.push(entry),
        }
    }

    /// Delay of every audio stream; streams without data stay unknown
    pub fn finish(mut self) -> AudioDelayMap {
        let (keyframe_position, first_pts) =
            match (self.first_keyframe_position, self.first_video_pts) {
                (Some(position), Some(pts)) => (position, pts),
                _ => return self.delays,
            };
        let video_ms = match pts_to_millis(first_pts, self.video_time_base) {
            Some(ms) => ms,
            None => return self.delays,
        };

        for (id, buffer) in &self.buffers {
            if let Some(first) = buffer.iter().find(|b| b.position >= keyframe_position) {
                self.delays.insert(*id, AudioDelay::Known(first.pts_ms - video_ms));
            }
        }

        self.delays
    }

    /// Scan `source` from the start of the span. `audio_filter` limits the
    /// measured streams and every id in it must name an audio stream.
    pub fn run<S: PacketSource + ?Sized>(
        source: &mut S,
        video_stream_id: i32,
        audio_filter: Option<&[i32]>,
        cancel: &CancellationToken,
        progress: &ProgressTracker,
    ) -> D2vResult<AudioDelayMap> {
        let container = source.container();
        let video_time_base = container
            .stream(video_stream_id)
            .map(|s| s.time_base)
            .ok_or(D2vError::VideoStreamNotFound {
                stream_id: video_stream_id,
            })?;
        let available: Vec<i32> = container.audio_streams().map(|s| s.id).collect();
        let audio_ids = match audio_filter {
            Some(requested) => {
                let missing: Vec<i32> = requested
                    .iter()
                    .copied()
                    .filter(|id| !available.contains(id))
                    .collect();
                if !missing.is_empty() {
                    return Err(D2vError::AudioStreamNotFound { stream_ids: missing });
                }
                available.into_iter().filter(|id| requested.contains(id)).collect()
            }
            None => available,
        };

        let mut calculator = Self::new(video_stream_id, video_time_base, audio_ids);
        if calculator.delays.is_empty() {
            return Ok(calculator.delays);
        }

        let span_size = source.span_size();
        source.open_at(0)?;

        while !calculator.is_done() {
            if cancel.is_cancelled() {
                return Err(D2vError::Cancelled);
            }
            let packet = match source.next_packet()? {
                Some(packet) => packet,
                None => break,
            };
            progress.update(packet.position(), span_size);
            calculator.observe(&packet);
        }

        source.open_at(0)?;

        debug!(
            first_keyframe = ?calculator.first_keyframe_position,
            resolved = calculator.resolved.len(),
            "Audio delay scan finished"
        );

        let delays = calculator.finish();
        for (id, delay) in &delays {
            match delay {
                AudioDelay::Known(ms) => info!(stream_id = %format!("{:x}", id), delay_ms = ms, "Audio delay"),
                AudioDelay::Unknown => info!(stream_id = %format!("{:x}", id), "Audio delay unknown"),
            }
        }

        Ok(delays)
    }
}
