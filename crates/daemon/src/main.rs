use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acquisition::{AcquisitionResult, DeviceManager};
use anyhow::Context;
use biosig_types::{DeviceEvent, DeviceFamily};
use clap::Parser;
use devices::mock::{MockBaseStation, MockOptions, Waveform};
use devices::{create_client, AnyClient, DeviceClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::DaemonConfig;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "acq_daemon", about = "Biosignal acquisition daemon")]
struct Args {
    /// YAML configuration file
    #[arg(long, default_value = "config/acq_daemon.yaml")]
    config: PathBuf,
    /// Device host, overrides the configuration file
    #[arg(long)]
    host: Option<String>,
    /// Device family: trigno, qtm or analog
    #[arg(long)]
    device: Option<DeviceFamily>,
    /// Stream from an in-process mock base station instead of hardware
    #[arg(long)]
    mock: bool,
    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<u64>,
    /// Record into a timestamped directory under this path
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

type Manager = Arc<DeviceManager<AnyClient>>;

/// Run a blocking manager call off the async runtime.
async fn blocking<F>(manager: &Manager, f: F) -> anyhow::Result<()>
where
    F: FnOnce(&DeviceManager<AnyClient>) -> AcquisitionResult<()> + Send + 'static,
{
    let manager = Arc::clone(manager);
    tokio::task::spawn_blocking(move || f(&manager)).await??;
    Ok(())
}

fn start_mock(config: &mut DaemonConfig) -> anyhow::Result<MockBaseStation> {
    let template = create_client(config.device, config.connection.clone());
    let mock = MockBaseStation::with_options(MockOptions {
        channel_count: template.channel_count(),
        waveform: Waveform::Sine,
        // Data-only families never send START.
        stream_without_start: !template.capabilities().control_channel,
        ..MockOptions::default()
    })
    .context("Failed to start mock base station")?;

    config.connection.host = "127.0.0.1".to_string();
    config.connection.control_port = Some(mock.control_port());
    config.connection.data_port = Some(mock.data_port());
    tracing::info!(
        "Mock base station listening on control port {} and data port {}",
        mock.control_port(),
        mock.data_port()
    );
    Ok(mock)
}

fn log_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Error { kind, detail } => tracing::error!("Device error ({}): {}", kind, detail),
        DeviceEvent::Connected { family } => tracing::info!("{} connected", family),
        DeviceEvent::Disconnected { family } => tracing::info!("{} disconnected", family),
        other => tracing::info!("Stream event: {:?}", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acq_daemon=info,acquisition=info,devices=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Acquisition daemon starting...");

    let args = Args::parse();
    let mut config = DaemonConfig::load(&args.config)?;
    if let Some(device) = args.device {
        config.device = device;
    }
    if let Some(host) = args.host {
        config.connection.host = host;
    }
    if let Some(seconds) = args.seconds {
        config.run_seconds = Some(seconds);
    }
    if let Some(root) = &args.save_dir {
        config.record_under(root);
    }

    let _mock = if args.mock {
        Some(start_mock(&mut config)?)
    } else {
        None
    };

    tracing::info!(
        "Using {} device at {}",
        config.device,
        config.connection.host
    );
    let manager: Manager = Arc::new(DeviceManager::new(
        create_client(config.device, config.connection.clone()),
        config.stream.clone(),
    ));
    manager.attach_session(config.session.clone());

    // --- Event logging ---
    let events = manager.events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            log_event(&event);
        }
    });

    // --- Frame consumer ---
    let frames = manager.frames();
    let drain_task = tokio::spawn(async move {
        let mut received = 0u64;
        while let Ok(frame) = frames.recv_async().await {
            received += 1;
            tracing::trace!("Frame {} with {} channels", frame.sequence, frame.channel_count());
        }
        received
    });

    let progress_manager = Arc::clone(&manager);
    let progress_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracing::info!(
                "{} frames delivered ({:?})",
                progress_manager.frames_delivered(),
                progress_manager.state()
            );
        }
    });

    let run = async {
        blocking(&manager, |m| m.connect()).await?;
        if let Some(dir) = config.save_dir() {
            tracing::info!("Recording session to {}", dir.display());
        }
        blocking(&manager, |m| m.start()).await?;

        match config.run_seconds {
            Some(seconds) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                        tracing::info!("Run time of {}s elapsed", seconds);
                    }
                    signal = tokio::signal::ctrl_c() => {
                        signal?;
                        tracing::info!("Shutdown signal received");
                    }
                }
            }
            None => {
                tokio::signal::ctrl_c().await?;
                tracing::info!("Shutdown signal received");
            }
        }
        anyhow::Ok(())
    };
    let outcome = run.await;
    if let Err(e) = &outcome {
        tracing::error!("Acquisition failed: {:#}", e);
    }

    // --- Graceful shutdown ---
    progress_task.abort();
    if let Err(e) = blocking(&manager, |m| m.stop()).await {
        tracing::warn!("Error stopping stream: {:#}", e);
    }
    if let Err(e) = blocking(&manager, |m| m.disconnect()).await {
        tracing::warn!("Error disconnecting: {:#}", e);
    }
    let delivered = manager.frames_delivered();

    let _ = progress_task.await;
    // Dropping the last manager handle closes the event and frame queues.
    drop(manager);
    let _ = event_task.await;
    let received = drain_task.await.unwrap_or(0);
    tracing::info!(
        "Acquisition daemon stopped ({} frames delivered, {} consumed)",
        delivered,
        received
    );

    outcome
}
