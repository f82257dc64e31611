//! Command implementations

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::adapters::{open_packet_source, TracingProgressCallback};
use crate::cli::args::{IndexArgs, InfoArgs, InspectArgs};
use crate::config_initialization::{IndexerConfig, ProgressMode};
use crate::domain::model::*;
use crate::engine::{
    CancellationToken, ConsoleProgressCallback, IndexJob, JobConfig, JobReport,
    JsonProgressCallback, NoOpProgressCallback, ProgressCallback,
};
use crate::output::{D2vDocument, D2vReader, OutputTarget};
use crate::ports::PacketSource;
use crate::streams::{suggest_audio_track_suffix, suggest_d2v_name};
use crate::utils::{format_file_size, PathUtils};

/// Progress callback for the configured mode
pub fn progress_callback(mode: ProgressMode, verbose: bool) -> Arc<dyn ProgressCallback> {
    match mode {
        ProgressMode::Console => Arc::new(ConsoleProgressCallback::new(verbose)),
        ProgressMode::Json => Arc::new(JsonProgressCallback::new(true)),
        ProgressMode::Log => Arc::new(TracingProgressCallback::new()),
        ProgressMode::None => Arc::new(NoOpProgressCallback),
    }
}

/// Execute the index command. Runs to a terminal outcome; only failures
/// before the job starts are returned as errors.
pub fn index(args: IndexArgs, config: &IndexerConfig, cancel: CancellationToken) -> Result<JobOutcome> {
    info!("Starting index operation");
    info!("Inputs: {:?}", args.inputs);

    let target = match args.output.as_deref() {
        Some(output) => OutputTarget::parse(output),
        None => OutputTarget::File(suggest_d2v_name(&args.inputs[0])),
    };
    if let Some(path) = target.path() {
        info!("Output: {}", path.display());
    }

    let (mut source, layout) =
        open_packet_source(&args.inputs).context("Failed to open input files")?;

    let file_names =
        PathUtils::header_names(&args.inputs, target.path(), config.index.relative_paths)
            .context("Failed to resolve input file names")?;

    let job_config = JobConfig {
        video_stream_id: args.video_id,
        audio_stream_ids: args.audio_ids.ids().map(<[i32]>::to_vec),
        colour_range: config.index.input_range,
        verify_keyframes: config.index.verify_keyframes,
        file_names,
    };

    let callback = progress_callback(config.progress.mode, true);
    let job = IndexJob::new(job_config)
        .with_progress(Arc::clone(&callback))
        .with_cancellation(cancel);

    let out = target.open().context("Failed to open output")?;
    let report = job.run(&mut source, &layout, out);

    if report.is_finished() {
        report_audio_tracks(&report, source.container(), &args.inputs[0], callback.as_ref());
    }

    Ok(report.outcome)
}

/// Suggested file names for the measured audio tracks
fn report_audio_tracks(
    report: &JobReport,
    container: &ContainerInfo,
    first_input: &Path,
    callback: &dyn ProgressCallback,
) {
    for stream in container.audio_streams() {
        if !report.audio_delays.contains_key(&stream.id) {
            continue;
        }
        let suffix = suggest_audio_track_suffix(stream, &report.audio_delays);
        let name = format!("{}{}", first_input.display(), suffix);
        info!(stream_id = %format!("{:x}", stream.id), "Audio track: {}", name);
        callback.on_message(&format!("Audio track {:x}: {}", stream.id, name));
    }
}

#[derive(Debug, Serialize)]
struct InputFile {
    path: PathBuf,
    size: u64,
}

#[derive(Debug, Serialize)]
struct InputReport<'a> {
    files: Vec<InputFile>,
    stream_type: StreamType,
    container: &'a ContainerInfo,
}

/// Execute the info command
pub fn info(args: InfoArgs) -> Result<()> {
    let (source, layout) =
        open_packet_source(&args.inputs).context("Failed to open input files")?;
    let container = source.container();

    let files = layout
        .paths()
        .iter()
        .zip(layout.sizes())
        .map(|(path, size)| InputFile {
            path: path.clone(),
            size: *size,
        })
        .collect::<Vec<_>>();

    if args.json {
        let report = InputReport {
            files,
            stream_type: container.stream_type(),
            container,
        };
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize input info to JSON")?;
        println!("{}", json);
        return Ok(());
    }

    println!("Input Files");
    println!("===========");
    for file in &files {
        println!("  {} ({})", file.path.display(), format_file_size(file.size));
    }
    println!();
    println!("Container: {} ({:?})", container.format_name, container.stream_type());
    println!();

    println!("Tracks:");
    for stream in &container.streams {
        match stream.kind {
            StreamKind::Video => println!(
                "  {:x}: video, {}, {}x{}, {} fps",
                stream.id, stream.codec_name, stream.width, stream.height, stream.frame_rate
            ),
            StreamKind::Audio => {
                let bit_rate = stream
                    .bit_rate
                    .map(|b| format!(", {} kbps", b / 1000))
                    .unwrap_or_default();
                println!("  {:x}: audio, {}{}", stream.id, stream.codec_name, bit_rate);
            }
            StreamKind::Other => println!("  {:x}: other, {}", stream.id, stream.codec_name),
        }
    }

    Ok(())
}

/// Summary of a D2V file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct D2vSummary {
    pub version: u32,
    pub files: Vec<String>,
    pub lines: usize,
    pub frames: usize,
    pub open_gops: usize,
    pub complete: bool,
    pub stats: Stats,
}

impl D2vSummary {
    pub fn from_document(document: &D2vDocument) -> Self {
        Self {
            version: document.version,
            files: document.files.clone(),
            lines: document.lines.len(),
            frames: document.num_frames(),
            open_gops: document.lines.iter().filter(|l| !l.is_closed_gop()).count(),
            complete: document.complete,
            stats: Stats::from_lines(&document.lines),
        }
    }
}

/// Execute the inspect command
pub fn inspect(args: InspectArgs) -> Result<()> {
    let file = File::open(&args.d2v)
        .with_context(|| format!("Failed to open '{}'", args.d2v.display()))?;
    let document = D2vReader::new(BufReader::new(file))
        .read()
        .with_context(|| format!("Failed to read '{}'", args.d2v.display()))?;
    let summary = D2vSummary::from_document(&document);

    if args.json {
        let json = serde_json::to_string_pretty(&summary)
            .context("Failed to serialize D2V summary to JSON")?;
        println!("{}", json);
        return Ok(());
    }

    if !summary.complete {
        warn!("D2V file has no stream end marker, it is probably truncated");
    }

    println!("D2V File: {}", args.d2v.display());
    println!("Version: {}", summary.version);
    println!("Files:");
    for name in &summary.files {
        println!("  {}", name);
    }
    for key in ["Stream_Type", "MPEG_Type", "Frame_Rate", "Picture_Size", "Aspect_Ratio"] {
        if let Some(value) = document.setting(key) {
            println!("{}: {}", key, value);
        }
    }
    println!("Lines: {}", summary.lines);
    println!("Frames: {}", summary.frames);
    println!("Open GOPs: {}", summary.open_gops);
    println!("Progressive: {}", summary.stats.progressive_frames);
    println!("Top field first: {}", summary.stats.tff_frames);
    println!("Repeat: {}", summary.stats.rff_frames);
    println!("Complete: {}", if summary.complete { "yes" } else { "no" });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::parse_d2v;

    const DOCUMENT: &str = "DGIndexProjectFile16\n1\n/dvd/in.m2v\n\nStream_Type=0\n\n\
        d00 5 0 0 0 0 0 d2 b2 b2\n100 5 0 4096 0 0 0 a0 b1 ff\n";

    #[test]
    fn test_summary_counts() {
        let document = parse_d2v(DOCUMENT).unwrap();
        let summary = D2vSummary::from_document(&document);

        assert_eq!(summary.lines, 2);
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.open_gops, 1);
        assert!(summary.complete);
        assert_eq!(summary.stats.tff_frames, 3);
        assert_eq!(summary.stats.progressive_frames, 1);
        assert_eq!(summary.stats.rff_frames, 1);
    }

    #[test]
    fn test_progress_callback_for_every_mode() {
        for mode in [ProgressMode::Console, ProgressMode::Json, ProgressMode::Log, ProgressMode::None] {
            let callback = progress_callback(mode, false);
            callback.on_message("");
        }
    }
}
