//! Command-line entry point.
//!
//! # Startup sequence
//!
//! 1. Parse arguments and initialise logging.
//! 2. Load [`AppConfig`] (defaults on first run) and apply CLI overrides.
//! 3. Create a [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Wire [`AudioSource`] → [`PeakEstimator`] (+ [`StreamRecorder`]).
//! 5. Log every peak update until the duration elapses or Ctrl-C.
//! 6. Stop the estimator, close the source and finalise the recording on a
//!    blocking task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use async_microphone::audio::{AudioHost, AudioSource, StreamRecorder};
use async_microphone::config::AppConfig;
use async_microphone::spectral::PeakEstimator;

#[derive(Parser, Debug)]
#[command(name = "async-microphone")]
#[command(about = "Track the spectral peak of the microphone signal and optionally record it")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input device name
    #[arg(long)]
    device: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<f64>,

    /// Lower edge of the search band in Hz
    #[arg(long)]
    min_hz: Option<f64>,

    /// Upper edge of the search band in Hz
    #[arg(long)]
    max_hz: Option<f64>,

    /// Buffers per analysis window
    #[arg(long)]
    buffers: Option<usize>,

    /// Record the raw stream to <PREFIX>-<onset>.wav
    #[arg(long, value_name = "PREFIX")]
    record: Option<PathBuf>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(device) = &self.device {
            config.source.device = Some(device.clone());
        }
        if let Some(min_hz) = self.min_hz {
            config.estimator.min_hz = min_hz;
        }
        if let Some(max_hz) = self.max_hz {
            config.estimator.max_hz = max_hz;
        }
        if let Some(buffers) = self.buffers {
            config.estimator.buffer_count = buffers;
        }
        if let Some(prefix) = &self.record {
            config.recorder.enabled = true;
            config.recorder.file_prefix = Some(prefix.clone());
        }
    }

    fn duration(&self) -> Result<Option<Duration>> {
        self.duration
            .map(|secs| Duration::try_from_secs_f64(secs).with_context(|| format!("invalid --duration {secs}")))
            .transpose()
    }
}

fn list_devices(host: &AudioHost) -> Result<()> {
    let devices = host.list_input_devices().context("enumerating input devices")?;
    if devices.is_empty() {
        println!("No input devices found");
        return Ok(());
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        let format = match (device.default_sample_rate, device.default_channels) {
            (Some(rate), Some(channels)) => format!(" ({rate} Hz, {channels} ch)"),
            _ => String::new(),
        };
        println!("{marker} {}{format}", device.name);
    }
    Ok(())
}

async fn run(config: AppConfig, duration: Option<Duration>) -> Result<()> {
    let host = Arc::new(AudioHost::new().with_device(config.source.device.clone()));
    let mic = AudioSource::new(host, &config.source)?;
    let estimator = PeakEstimator::new(&mic, &config.estimator)?;

    let (peak_tx, mut peak_rx) = mpsc::unbounded_channel::<f64>();
    estimator.subscribe_peak(move |hz: &f64| {
        peak_tx
            .send(*hz)
            .map_err(|_| anyhow::anyhow!("peak consumer has shut down"))
    });

    let recorder = if config.recorder.enabled {
        let recorder = StreamRecorder::new(&mic);
        let path = recorder.begin(config.recorder.resolved_prefix())?;
        log::info!("Recording to {}", path.display());
        Some(recorder)
    } else {
        None
    };

    mic.open(None)?;
    estimator.start(None)?;

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(hz) = peak_rx.recv() => log::info!("peak: {hz:.2} Hz"),
            _ = &mut deadline => {
                log::info!("Duration elapsed");
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    log::warn!("Ctrl-C handler failed: {e}");
                }
                log::info!("Interrupted");
                break;
            }
        }
    }

    // stop() and close() join threads; keep them off the runtime workers.
    tokio::task::spawn_blocking(move || -> Result<()> {
        estimator.stop();
        mic.close();
        if let Some(recorder) = recorder {
            recorder.close()?;
        }
        if let Some(hz) = estimator.peak() {
            log::info!("Final peak: {hz:.2} Hz");
        }
        Ok(())
    })
    .await
    .context("shutdown task failed")??;

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if cli.list_devices {
        return list_devices(&AudioHost::new());
    }

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e:#}); using defaults");
            AppConfig::default()
        }),
    };
    cli.apply(&mut config);
    let duration = cli.duration()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(config, duration))
}
