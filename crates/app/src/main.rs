use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use serde::Serialize;
use spectrum_bars_core::{
    AppConfig, BarGeometry, BarSnapshot, DecodeEngine, PlaybackClock, PlaybackState, SpectrumBars,
    SpectrumError,
};
use tracing_subscriber::EnvFilter;

/// Interval between two redraws of the text bars.
const RENDER_INTERVAL: Duration = Duration::from_millis(100);
/// Upper bound on how long `analyze` waits for a frame after a scrub.
const SCRUB_SETTLE: Duration = Duration::from_millis(500);

fn main() -> spectrum_bars_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Play {
            input,
            seconds,
            height,
        } => run_play(&config, &input, seconds.map(Duration::from_secs), height),
        Commands::Analyze {
            input,
            output,
            step_ms,
        } => run_analyze(&config, &input, &output, step_ms),
    }
}

fn open_session(
    config: &AppConfig,
    input: &Path,
) -> spectrum_bars_core::Result<(DecodeEngine, SpectrumBars)> {
    let mut engine = DecodeEngine::from_config(config);
    engine.open(input)?;

    let mut bars = SpectrumBars::new(config.bars.clone(), config.analyzer.fft_size)?;
    bars.attach(&engine)?;
    bars.reset();
    Ok((engine, bars))
}

fn run_play(
    config: &AppConfig,
    input: &Path,
    limit: Option<Duration>,
    height: u32,
) -> spectrum_bars_core::Result<()> {
    tracing::info!(?input, ?limit, "starting playback");

    let (mut engine, mut bars) = open_session(config, input)?;
    let geometry = BarGeometry::new(height, 1, 1)?;
    let mut clock = PlaybackClock::with_duration(engine.duration_ms());

    clock.play();
    bars.handle_playback_state(&engine, clock.state(), clock.position_ms())?;

    let frame_interval = config.bars.frame_interval();
    let tick_interval = config.bars.tick_interval();
    // Stand-in for the audio output: consume what one frame interval plays.
    let samples_per_frame = engine
        .sample_rate()
        .zip(engine.channels())
        .map(|(rate, channels)| {
            rate as usize * channels as usize * config.bars.frame_interval_ms as usize / 1000
        })
        .unwrap_or(0);

    let started = Instant::now();
    let mut next_frame = started;
    let mut next_tick = started;
    let mut next_render = started;
    let mut stdout = std::io::stdout().lock();

    loop {
        let now = Instant::now();
        if clock.finished_at(now) || limit.is_some_and(|limit| now - started >= limit) {
            break;
        }
        if !engine.is_running() {
            tracing::warn!("decode loop stopped producing data");
            break;
        }

        if now >= next_frame {
            bars.update_frame(&engine, clock.position_at(now))?;
            // There is no output device: drop what it would have played.
            let _played = engine.get_audio_data(samples_per_frame)?;
            next_frame += frame_interval;
        }
        if now >= next_tick {
            bars.tick();
            next_tick += tick_interval;
        }
        if now >= next_render {
            if bars.take_dirty() {
                let frame = geometry.render_text(&bars.snapshot());
                write!(stdout, "\x1b[2J\x1b[H{frame}\n{:>8} ms", clock.position_at(now))?;
                stdout.flush()?;
            }
            next_render += RENDER_INTERVAL;
        }

        thread::sleep(Duration::from_millis(1));
    }
    writeln!(stdout)?;

    clock.pause();
    bars.handle_playback_state(&engine, PlaybackState::Paused, clock.position_ms())?;
    engine.close();
    tracing::info!(position_ms = clock.position_ms(), "playback finished");
    Ok(())
}

#[derive(Debug, Serialize)]
struct AnalysisReport {
    input: PathBuf,
    sample_rate: u32,
    channels: u16,
    duration_ms: Option<u64>,
    step_ms: u64,
    frames: Vec<TimedSnapshot>,
}

#[derive(Debug, Serialize)]
struct TimedSnapshot {
    position_ms: i64,
    #[serde(flatten)]
    snapshot: BarSnapshot,
}

fn run_analyze(
    config: &AppConfig,
    input: &Path,
    output: &Path,
    step_ms: u64,
) -> spectrum_bars_core::Result<()> {
    tracing::info!(?input, ?output, step_ms, "scrubbing file");
    if step_ms == 0 {
        return Err(SpectrumError::InvalidInput("step must be at least 1ms"));
    }

    let (mut engine, mut bars) = open_session(config, input)?;
    let duration_ms = engine.duration_ms();
    let end_ms = duration_ms.unwrap_or(0) as i64;

    let mut frames = Vec::new();
    let mut position_ms = 0;
    while position_ms <= end_ms {
        let before = engine.frames_decoded();
        bars.update_for_position(&engine, position_ms)?;

        let deadline = Instant::now() + SCRUB_SETTLE;
        while engine.frames_decoded() == before && Instant::now() < deadline {
            if !engine.is_running() {
                return Err(SpectrumError::msg("decode loop stopped during analysis"));
            }
            thread::sleep(Duration::from_millis(2));
        }
        bars.drain_snapshots();
        bars.tick();

        frames.push(TimedSnapshot {
            position_ms,
            snapshot: bars.snapshot(),
        });
        position_ms += step_ms as i64;
    }

    let report = AnalysisReport {
        input: input.to_path_buf(),
        sample_rate: engine.sample_rate().unwrap_or_default(),
        channels: engine.channels().unwrap_or_default(),
        duration_ms,
        step_ms,
        frames,
    };
    engine.close();

    let writer = BufWriter::new(File::create(output)?);
    serde_json::to_writer_pretty(writer, &report)
        .map_err(|e| SpectrumError::msg(format!("failed to write report: {e}")))?;
    tracing::info!(frames = report.frames.len(), ?output, "analysis written");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time spectrum bars for audio files", long_about = None)]
struct Cli {
    /// Optional JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a file against a simulated transport and draw the bars.
    Play {
        /// Path to the audio file.
        input: PathBuf,
        /// Stop after this many seconds instead of at the end of the file.
        #[arg(short, long)]
        seconds: Option<u64>,
        /// Height of the bar strip in rows.
        #[arg(long, default_value_t = 16)]
        height: u32,
    },
    /// Scrub through a file and write bar snapshots as JSON.
    Analyze {
        /// Path to the audio file.
        input: PathBuf,
        /// Output path for the JSON report.
        output: PathBuf,
        /// Distance between two scrub positions.
        #[arg(long, default_value_t = 250)]
        step_ms: u64,
    },
}
