use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rhythm_trainer::analysis::spectral::SpectralAnalyzer;
use rhythm_trainer::analysis::{AnalysisPipeline, AudioHit};
use rhythm_trainer::engine::SilentClickPlayer;
use rhythm_trainer::{
    AppConfig, InputMode, SessionCollaborators, SessionSummary, TerminalNotice, TrainingSession,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "rhythm_cli", about = "Rhythm trainer sessions and offline hit detection")]
struct Cli {
    /// JSON configuration file (defaults are used when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run hit detection over a WAV file and print one JSON line per hit
    Analyze {
        #[arg(long)]
        wav: PathBuf,
    },
    /// Run a live session and print the summary as JSON
    Session {
        #[arg(long, default_value_t = 90)]
        tempo: u32,
        #[arg(long, default_value_t = 10)]
        duration: u32,
        #[arg(long, value_enum, default_value_t = ModeArg::Manual)]
        mode: ModeArg,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    Manual,
    Acoustic,
}

impl From<ModeArg> for InputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Manual => InputMode::Manual,
            ModeArg::Acoustic => InputMode::Acoustic,
        }
    }
}

#[derive(Serialize)]
struct Report {
    summary: SessionSummary,
    accuracy_percent: f64,
    notice: Option<TerminalNotice>,
}

#[derive(Serialize)]
struct HitRecord {
    offset_secs: f64,
    intensity: f32,
}

fn main() -> ExitCode {
    rhythm_trainer::init_logging();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = cli
        .config
        .as_deref()
        .map(AppConfig::load_from_file)
        .unwrap_or_default();

    match cli.command {
        Commands::Analyze { wav } => run_analyze(config, &wav),
        Commands::Session {
            tempo,
            duration,
            mode,
        } => run_session(config, tempo, duration, mode.into()),
    }
}

fn run_analyze(mut config: AppConfig, wav: &Path) -> Result<()> {
    let (samples, sample_rate) =
        read_mono_wav(wav).with_context(|| format!("reading {}", wav.display()))?;
    config.spectral.sample_rate = sample_rate;

    let analyzer = SpectralAnalyzer::new(&config.spectral).context("building FFT context")?;
    let mut pipeline = AnalysisPipeline::new(analyzer, config.onset_detection.clone());

    let base = Instant::now();
    for hit in detect_hits(&mut pipeline, &samples, sample_rate, base) {
        let record = HitRecord {
            offset_secs: hit.timestamp.duration_since(base).as_secs_f64(),
            intensity: hit.intensity,
        };
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

/// Feed `samples` through the pipeline one analyzer frame at a time,
/// stamping each frame with its offset from `base`. Invalid frames are
/// logged and skipped.
fn detect_hits(
    pipeline: &mut AnalysisPipeline,
    samples: &[f32],
    sample_rate: u32,
    base: Instant,
) -> Vec<AudioHit> {
    let frame_len = pipeline.analyzer().buffer_size();
    let mut hits = Vec::new();
    for (index, frame) in samples.chunks(frame_len).enumerate() {
        let offset_secs = (index * frame_len) as f64 / sample_rate as f64;
        let captured_at = base + Duration::from_secs_f64(offset_secs);
        match pipeline.process_frame(frame, sample_rate, captured_at) {
            Ok(Some(hit)) => hits.push(hit),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("[rhythm_cli] Skipping frame {}: {}", index, err);
            }
        }
    }
    hits
}

/// Decode a WAV file into mono floats in [-1, 1].
fn read_mono_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

fn run_session(mut config: AppConfig, tempo: u32, duration: u32, mode: InputMode) -> Result<()> {
    config.session.tempo_bpm = tempo;
    config.session.duration_secs = duration;
    config.session.input_mode = mode;

    let collaborators = match mode {
        InputMode::Manual => SessionCollaborators::manual(Arc::new(SilentClickPlayer::new())),
        InputMode::Acoustic => acoustic_collaborators(&mut config)?,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let (summary, notice) = runtime.block_on(async move {
        let mut session = TrainingSession::prepare(config, collaborators).await?;
        let handle = session.handle();

        if mode == InputMode::Manual {
            eprintln!("Press Enter on each beat, type q to stop");
        }
        // Detached: blocks on stdin until the process exits
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let delivered = if line.trim() == "q" {
                    handle.stop()
                } else {
                    handle.tap()
                };
                if !delivered {
                    break;
                }
            }
        });

        session.start()?;
        let summary = session.run().await?;
        Ok::<_, anyhow::Error>((summary, session.notice().cloned()))
    })?;

    let report = Report {
        summary,
        accuracy_percent: summary.accuracy_percent(),
        notice,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(feature = "desktop_audio")]
fn acoustic_collaborators(config: &mut AppConfig) -> Result<SessionCollaborators> {
    use rhythm_trainer::engine::{CpalCapture, CpalClickPlayer, StaticPermission};

    config.spectral.sample_rate =
        CpalCapture::default_sample_rate().context("querying input device")?;
    let click_player = CpalClickPlayer::new().context("opening output device")?;
    Ok(SessionCollaborators::acoustic(
        Box::new(CpalCapture::new()),
        Arc::new(click_player),
        Arc::new(StaticPermission::granted()),
    ))
}

#[cfg(not(feature = "desktop_audio"))]
fn acoustic_collaborators(_config: &mut AppConfig) -> Result<SessionCollaborators> {
    anyhow::bail!("acoustic mode requires building with --features desktop_audio")
}
