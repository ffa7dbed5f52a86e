use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zstage_lib::monitor::{MonitorEvent, PositionMonitor};
use zstage_lib::{SessionConfig, StageSession};

/// Stream stage positions until Ctrl+C is pressed.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "/dev/ttyUSB0", env = "ZSTAGE_PORT")]
    port: String,

    /// Polling interval in milliseconds
    #[arg(short, long, default_value_t = 200)]
    interval_ms: u64,

    /// Print each sample as a JSON line
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(args.verbose.tracing_level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = SessionConfig::default().with_port(args.port.clone());
    let session = StageSession::open(&config).with_context(|| format!("Failed to open {}", args.port))?;

    let cancel = CancellationToken::new();
    let (monitor, mut events) =
        PositionMonitor::for_session(&session, Duration::from_millis(args.interval_ms), cancel.clone());
    info!("--- Monitoring positions (Ctrl+C to stop) ---");

    let mut samples = 0u64;
    let mut failures = 0u64;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down gracefully.");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Monitor stopped on its own");
                    break;
                };
                if args.json {
                    println!("{}", serde_json::to_string(&event)?);
                }
                match event {
                    MonitorEvent::Sample(sample) => {
                        samples += 1;
                        if !args.json {
                            println!("[{:>8.2}s] {}", sample.elapsed.as_secs_f64(), sample.position);
                        }
                    }
                    MonitorEvent::ReadFailed { axis, message, .. } => {
                        failures += 1;
                        if !args.json {
                            warn!(%axis, "Read failed: {message}");
                        }
                    }
                }
            }
        }
    }

    cancel.cancel();
    tokio::task::spawn_blocking(move || monitor.stop()).await?;
    session.close()?;
    info!(samples, failures, "Finished monitoring");
    Ok(())
}
