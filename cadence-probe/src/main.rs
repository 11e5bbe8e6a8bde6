//! Cadence Probe
//!
//! Headless driver for the decode engine: inspect a file, decode through a
//! buffer pool, seek, or dump a single frame as PNG.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use cadence_core::{
    BufferPool, DecodeBuffer, Decoded, EngineConfig, FrameLoader, MediaEngine, NativeBackend,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Info,
    Decode,
    Seek,
    Frame,
}

struct ProbeOptions {
    command: Command,
    input: PathBuf,
    frames: u64,
    to_ms: i64,
    out: PathBuf,
    channels: u16,
    hardware: bool,
    config: EngineConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cadence_core=info".parse()?)
                .add_directive("cadence_probe=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;
    info!(
        "Cadence Probe v{} ({:?} {})",
        cadence_core::VERSION,
        options.command,
        options.input.display()
    );

    match options.command {
        Command::Info => run_info(&options),
        Command::Decode => run_decode(&options),
        Command::Seek => run_seek(&options),
        Command::Frame => run_frame(&options),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn open_engine(options: &ProbeOptions) -> Result<(MediaEngine, Arc<BufferPool>)> {
    let pool = Arc::new(BufferPool::new());
    let mut engine = MediaEngine::new(Arc::new(NativeBackend::new()), pool.clone(), options.config.clone());
    engine
        .prepare(&options.input, options.hardware, options.channels)
        .with_context(|| format!("Failed to prepare {}", options.input.display()))?;
    Ok((engine, pool))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_info(options: &ProbeOptions) -> Result<()> {
    info!("Available decoders: {}", NativeBackend::available_decoders().join(", "));
    let (mut engine, _pool) = open_engine(options)?;
    let info = engine
        .media_info()
        .ok_or_else(|| anyhow!("Engine lost its media info"))?;
    print_json(info)?;
    engine.release();
    Ok(())
}

#[derive(Debug, Default, Serialize)]
struct DecodeSummary {
    video_frames: u64,
    audio_buffers: u64,
    audio_bytes: u64,
    errors: u64,
    last_video_pts_ms: Option<i64>,
    last_audio_pts_ms: Option<i64>,
    reached_end: bool,
}

fn run_decode(options: &ProbeOptions) -> Result<()> {
    let (mut engine, pool) = open_engine(options)?;
    let mut summary = DecodeSummary::default();

    while summary.video_frames + summary.audio_buffers < options.frames {
        match engine.decode() {
            Ok(Decoded::EndOfStream) => {
                summary.reached_end = true;
                break;
            }
            Ok(decoded) => debug!("{:?}", decoded),
            Err(e) if e.is_recoverable() => {
                warn!("Decode error: {}", e);
                summary.errors += 1;
            }
            Err(e) => return Err(e.into()),
        }

        while let Some(buffer) = pool.pop_video() {
            if !buffer.is_last_frame {
                summary.video_frames += 1;
                summary.last_video_pts_ms = Some(buffer.pts_ms);
            }
            pool.recycle(buffer);
        }
        while let Some(buffer) = pool.pop_audio() {
            if let Some(payload) = buffer.audio_payload() {
                summary.audio_buffers += 1;
                summary.audio_bytes += payload.pcm.len() as u64;
                summary.last_audio_pts_ms = Some(buffer.pts_ms);
            }
            pool.recycle(buffer);
        }
    }

    let stats = pool.stats();
    info!(
        "Decoded {} video frame(s), {} audio buffer(s); pool allocated {}, recycled {}",
        summary.video_frames, summary.audio_buffers, stats.total_allocated, stats.total_recycled
    );
    print_json(&summary)?;
    engine.release();
    Ok(())
}

fn run_seek(options: &ProbeOptions) -> Result<()> {
    let (mut engine, _pool) = open_engine(options)?;
    let mut video = DecodeBuffer::video();
    let mut audio = DecodeBuffer::audio();
    let report = engine.seek_to(options.to_ms, &mut video, &mut audio, true)?;
    print_json(&report)?;
    engine.release();
    Ok(())
}

fn run_frame(options: &ProbeOptions) -> Result<()> {
    let mut loader = FrameLoader::new(Arc::new(NativeBackend::new()), options.config.clone());
    loader
        .prepare(&options.input)
        .with_context(|| format!("Failed to prepare {}", options.input.display()))?;

    let frame = loader
        .get_frame(options.to_ms, true)?
        .ok_or_else(|| anyhow!("No frame at {} ms", options.to_ms))?;
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| anyhow!("Frame buffer does not match {}x{}", frame.width, frame.height))?;
    image
        .save(&options.out)
        .with_context(|| format!("Failed to write {}", options.out.display()))?;

    info!(
        "Wrote {}x{} frame at {:?} ms to {}",
        image.width(),
        image.height(),
        loader.frame_pts_ms(),
        options.out.display()
    );
    loader.release();
    Ok(())
}

// ============================================================================
// Arguments
// ============================================================================

fn parse_args(args: &[String]) -> Result<ProbeOptions> {
    let command = match args.get(1).map(String::as_str) {
        Some("info") => Command::Info,
        Some("decode") => Command::Decode,
        Some("seek") => Command::Seek,
        Some("frame") => Command::Frame,
        Some("--help") | Some("-h") => {
            print_usage();
            std::process::exit(0);
        }
        Some(other) => {
            print_usage();
            return Err(anyhow!("Unknown command: {}", other));
        }
        None => {
            print_usage();
            return Err(anyhow!("Missing command"));
        }
    };

    let mut input: Option<PathBuf> = None;
    let mut frames: u64 = 120;
    let mut to_ms: i64 = 0;
    let mut out = PathBuf::from("frame.png");
    let mut channels: u16 = 0;
    let mut hardware = false;
    let mut config = EngineConfig::default();

    let mut i = 2;
    while i < args.len() {
        let value = || args.get(i + 1).ok_or_else(|| anyhow!("Missing value for {}", args[i]));
        match args[i].as_str() {
            "--input" | "-i" => {
                input = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--frames" | "-n" => {
                let v = value()?;
                frames = v.parse().map_err(|e| anyhow!("Invalid frame count {}: {}", v, e))?;
                i += 2;
            }
            "--to" | "-t" => {
                let v = value()?;
                to_ms = v.parse().map_err(|e| anyhow!("Invalid position {}: {}", v, e))?;
                i += 2;
            }
            "--out" | "-o" => {
                out = PathBuf::from(value()?);
                i += 2;
            }
            "--channels" => {
                let v = value()?;
                channels = v.parse().map_err(|e| anyhow!("Invalid channel count {}: {}", v, e))?;
                i += 2;
            }
            "--config" | "-c" => {
                let v = value()?;
                config = EngineConfig::from_json_file(v).map_err(|e| anyhow!(e))?;
                i += 2;
            }
            "--hw" => {
                hardware = true;
                i += 1;
            }
            other => {
                warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    let input = input.ok_or_else(|| {
        print_usage();
        anyhow!("Missing required --input")
    })?;

    Ok(ProbeOptions {
        command,
        input,
        frames,
        to_ms,
        out,
        channels,
        hardware,
        config,
    })
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  cadence-probe <info|decode|seek|frame> --input <file> [--frames <n>] [--to <ms>]\n                [--out <png>] [--channels <n>] [--config <json>] [--hw]\n"
    );
}
