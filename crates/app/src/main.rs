use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand, ValueEnum};
use metronome_core::{
    AppConfig, AudioHost, ClickAnalyzer, ClickReport, Clock, ManualClock, MetronomeError,
    MetronomeSession, RecordingHost, SynthHost, SystemClock, TapEstimator, TapOutcome,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Host calls kept by the silent backend.
const SILENT_JOURNAL_CAPACITY: usize = 4_096;
/// Longest wait between two looks at stdin when nothing is scheduled.
const IDLE_WAIT: Duration = Duration::from_millis(100);

fn main() -> metronome_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Play {
            rhythm,
            seconds,
            backend,
        } => {
            rhythm.apply(&mut config)?;
            with_backend(backend, |host| run_play(host, &config, seconds))
        }
        Commands::Interactive { rhythm, backend } => {
            rhythm.apply(&mut config)?;
            with_backend(backend, |host| run_interactive(host, &config))
        }
        Commands::Render {
            rhythm,
            seconds,
            output,
        } => {
            rhythm.apply(&mut config)?;
            run_render(&config, seconds, output.as_deref())
        }
        Commands::Estimate { input } => run_estimate(&config, &input),
    }
}

/// A host for the real-time commands. Both variants drive the same session
/// code.
enum LiveHost {
    Silent(RecordingHost<SystemClock>),
    #[cfg_attr(not(feature = "device"), allow(dead_code))]
    Synth(SynthHost),
}

fn with_backend(
    backend: Backend,
    run: impl FnOnce(LiveHost) -> metronome_core::Result<()>,
) -> metronome_core::Result<()> {
    match backend {
        Backend::Silent => {
            tracing::info!("using the silent backend");
            let host = RecordingHost::with_capacity(SystemClock::start(), SILENT_JOURNAL_CAPACITY);
            run(LiveHost::Silent(host))
        }
        Backend::Device => open_device(run),
    }
}

#[cfg(feature = "device")]
fn open_device(
    run: impl FnOnce(LiveHost) -> metronome_core::Result<()>,
) -> metronome_core::Result<()> {
    let output = metronome_core::DeviceOutput::open_default()?;
    let result = run(LiveHost::Synth(output.host()));
    drop(output);
    result
}

#[cfg(not(feature = "device"))]
fn open_device(
    _run: impl FnOnce(LiveHost) -> metronome_core::Result<()>,
) -> metronome_core::Result<()> {
    Err(MetronomeError::AudioUnavailable(
        "built without the `device` feature".into(),
    ))
}

fn run_play(host: LiveHost, config: &AppConfig, seconds: Option<f64>) -> metronome_core::Result<()> {
    match host {
        LiveHost::Silent(host) => play(host, config, seconds),
        LiveHost::Synth(host) => play(host, config, seconds),
    }
}

fn play<H: AudioHost + Clone>(
    host: H,
    config: &AppConfig,
    seconds: Option<f64>,
) -> metronome_core::Result<()> {
    let deadline = match seconds {
        Some(seconds) => Some(Instant::now() + Duration::from_secs_f64(checked_seconds(seconds)?)),
        None => None,
    };
    let mut session = MetronomeSession::new(host.clone(), config)?;
    tracing::info!(
        tempo = session.state().tempo,
        beats = session.state().beats,
        ?seconds,
        "starting playback"
    );

    session.start();
    while let Some(poll) = session.pending_poll() {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        thread::sleep(until(&host, poll.due));
        if let Some(event) = session.service() {
            tracing::info!(beat = event.beat, time = event.time, "beat");
        }
    }
    session.stop();
    Ok(())
}

fn run_interactive(host: LiveHost, config: &AppConfig) -> metronome_core::Result<()> {
    match host {
        LiveHost::Silent(host) => interactive(host, config),
        LiveHost::Synth(host) => interactive(host, config),
    }
}

fn interactive<H: AudioHost + Clone>(host: H, config: &AppConfig) -> metronome_core::Result<()> {
    let mut session = MetronomeSession::new(host.clone(), config)?;
    let lines = spawn_stdin_reader();

    println!("Enter = tap, t = start/stop, +/- = tempo, x2 / /2 / x1 = multiplier, <bpm> = set, q = quit");
    print_state(&session);

    loop {
        let wait = session
            .pending_poll()
            .map(|poll| until(&host, poll.due))
            .unwrap_or(IDLE_WAIT);

        match lines.recv_timeout(wait) {
            Ok(line) => {
                if !handle_command(&mut session, line.trim()) {
                    break;
                }
                print_state(&session);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if let Some(event) = session.service() {
            tracing::debug!(beat = event.beat, time = event.time, "beat");
        }
    }

    session.stop();
    Ok(())
}

/// Applies one command line. Returns `false` when the user quits.
fn handle_command<H: AudioHost + Clone>(session: &mut MetronomeSession<H>, command: &str) -> bool {
    let display = session.display_tempo() as f64;
    let result = match command {
        "" => {
            let outcome = session.tap();
            println!("tap: {outcome:?}");
            Ok(())
        }
        "q" | "quit" => return false,
        "t" => {
            session.toggle();
            Ok(())
        }
        "+" => session.set_display_tempo(display + 1.0, false),
        "-" => session.set_display_tempo((display - 1.0).max(1.0), false),
        "x2" => {
            session.apply_multiplier(2.0);
            Ok(())
        }
        "/2" => {
            session.apply_multiplier(0.5);
            Ok(())
        }
        "x1" => {
            session.apply_multiplier(1.0);
            Ok(())
        }
        other => match other.parse::<f64>() {
            Ok(bpm) => session.set_display_tempo(bpm, true),
            Err(_) => Err(MetronomeError::msg(format!("unknown command `{other}`"))),
        },
    };

    if let Err(err) = result {
        tracing::warn!(%err, "command rejected");
    }
    true
}

fn print_state<H: AudioHost + Clone>(session: &MetronomeSession<H>) {
    let state = session.state();
    println!(
        "{} bpm (x{}) {}",
        session.display_tempo(),
        session.multiplier(),
        if state.running { "running" } else { "stopped" }
    );
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    receiver
}

fn until(clock: &impl Clock, due: f64) -> Duration {
    Duration::from_secs_f64((due - clock.now()).max(0.0))
}

/// Rejects durations that are negative or not finite.
fn checked_seconds(seconds: f64) -> metronome_core::Result<f64> {
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(seconds)
    } else {
        Err(MetronomeError::msg(format!(
            "`{seconds}` is not a duration in seconds"
        )))
    }
}

fn run_render(config: &AppConfig, seconds: f64, output: Option<&Path>) -> metronome_core::Result<()> {
    let seconds = checked_seconds(seconds)?;
    let host = SynthHost::new(config.audio.sample_rate);
    let mut session = MetronomeSession::new(host.clone(), config)?;
    session.start();

    let samples = host.render_with(seconds, config.audio.block_size, || {
        session.service();
    });
    session.stop();

    let mut analyzer = ClickAnalyzer::new(config.audio.sample_rate);
    let report: ClickReport = analyzer.analyze(&samples)?;
    tracing::info!(
        clicks = report.clicks.len(),
        tempo = ?report.tempo_bpm,
        "rendered bounce"
    );

    write_json(output, &report)
}

#[derive(Debug, Serialize)]
struct ReplayedTap {
    timestamp_ms: f64,
    outcome: TapOutcome,
}

#[derive(Debug, Serialize)]
struct ReplaySummary {
    taps: Vec<ReplayedTap>,
    tempo: Option<u32>,
}

fn run_estimate(config: &AppConfig, input: &Path) -> metronome_core::Result<()> {
    let contents = fs::read_to_string(input)?;
    let mut estimator = TapEstimator::new(ManualClock::new(), config.tap.clone());
    let mut taps = Vec::new();

    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let timestamp_ms = parse_timestamp(line).ok_or_else(|| {
            MetronomeError::msg(format!(
                "{}:{}: `{line}` is not a timestamp in milliseconds",
                input.display(),
                number + 1
            ))
        })?;
        taps.push(ReplayedTap {
            timestamp_ms,
            outcome: estimator.tap_at(timestamp_ms),
        });
    }

    tracing::info!(taps = taps.len(), tempo = ?estimator.tempo(), "replayed taps");
    write_json(
        None,
        &ReplaySummary {
            taps,
            tempo: estimator.tempo(),
        },
    )
}

fn parse_timestamp(line: &str) -> Option<f64> {
    line.parse::<f64>().ok().filter(|timestamp| timestamp.is_finite())
}

fn write_json<T: Serialize>(output: Option<&Path>, value: &T) -> metronome_core::Result<()> {
    match output {
        Some(path) => {
            fs::write(path, serde_json::to_vec_pretty(value)?)?;
            tracing::info!(?path, "wrote report");
        }
        None => {
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, value)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Tap-tempo metronome", long_about = None)]
struct Cli {
    /// JSON configuration file. Missing sections use defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Schedules without sound; every host call is journalled.
    Silent,
    /// Default output device (requires the `device` feature).
    Device,
}

#[derive(clap::Args, Debug)]
struct RhythmArgs {
    /// Beats per minute.
    #[arg(short, long)]
    tempo: Option<f64>,
    /// Beats per bar.
    #[arg(short, long)]
    beats: Option<u32>,
}

impl RhythmArgs {
    fn apply(&self, config: &mut AppConfig) -> metronome_core::Result<()> {
        if let Some(tempo) = self.tempo {
            config.session.tempo = tempo;
        }
        if let Some(beats) = self.beats {
            config.session.beats = beats;
        }
        config.validate()
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play the metronome in real time.
    Play {
        #[command(flatten)]
        rhythm: RhythmArgs,
        /// Stop after this many seconds; plays until interrupted otherwise.
        #[arg(short, long)]
        seconds: Option<f64>,
        #[arg(long, value_enum, default_value_t = Backend::Device)]
        backend: Backend,
    },
    /// Tap tempo and control the metronome from standard input.
    Interactive {
        #[command(flatten)]
        rhythm: RhythmArgs,
        #[arg(long, value_enum, default_value_t = Backend::Device)]
        backend: Backend,
    },
    /// Bounce the metronome offline and print a click report.
    Render {
        #[command(flatten)]
        rhythm: RhythmArgs,
        #[arg(short, long, default_value_t = 4.0)]
        seconds: f64,
        /// Write the JSON report here instead of standard output.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay tap timestamps (milliseconds, one per line) through the
    /// estimator.
    Estimate { input: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_must_be_finite_and_non_negative() {
        assert_eq!(checked_seconds(0.0).unwrap(), 0.0);
        assert_eq!(checked_seconds(2.5).unwrap(), 2.5);
        for seconds in [f64::INFINITY, f64::NAN, -1.0] {
            assert!(checked_seconds(seconds).is_err(), "{seconds} accepted");
        }
    }

    #[test]
    fn playback_rejects_an_infinite_duration_before_starting() {
        let host = RecordingHost::new();
        let result = play(host.clone(), &AppConfig::default(), Some(f64::INFINITY));

        assert!(result.is_err());
        assert_eq!(host.call_count(), 0);
    }

    #[test]
    fn timestamps_parse_only_finite_numbers() {
        assert_eq!(parse_timestamp("12.5"), Some(12.5));
        assert_eq!(parse_timestamp("1000"), Some(1_000.0));
        for line in ["nan", "NaN", "inf", "-inf", "infinity", "soon"] {
            assert_eq!(parse_timestamp(line), None, "{line} accepted");
        }
    }

    #[test]
    fn rendering_rejects_an_infinite_duration() {
        assert!(run_render(&AppConfig::default(), f64::INFINITY, None).is_err());
    }
}
