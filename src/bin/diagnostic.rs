use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::thread::sleep;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use zstage_lib::constants::{BAUD_RATE, DEFAULT_TIMEOUT, FRAME_SIZE, LSM_STEP_SIZE_MM};
use zstage_lib::frame::{Command, Frame};
use zstage_lib::transport::{SerialTransport, Transport, available_ports};

/// Raw-frame diagnostic for the stage line: queries each unit's position
/// without going through the channel layer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port; defaults to the first port found.
    #[arg(short, long)]
    port: Option<String>,
    #[arg(short, long, default_value_t = BAUD_RATE)]
    baud: u32,
    /// Unit ids to query.
    #[arg(short, long, value_delimiter = ',', default_values_t = [1u8, 2, 3])]
    units: Vec<u8>,
    /// Also sweep inter-request delays (ms) to find a reliable pacing.
    #[arg(long, value_delimiter = ',')]
    timing: Vec<u64>,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Debug)]
enum Outcome {
    Matched(Frame),
    Mismatched(Frame),
    TimedOut(usize),
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli) {
        error!("Diagnostic failed: {:?}", e);
        process::exit(1);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let port = match cli.port {
        Some(port) => port,
        None => {
            let ports = available_ports().context("Failed to list serial ports")?;
            for p in &ports {
                info!("  {}: {}", p.name, p.description);
            }
            match ports.into_iter().next() {
                Some(p) => p.name,
                None => bail!("No serial ports found"),
            }
        }
    };

    let mut transport =
        SerialTransport::open_with_baud(&port, cli.baud).with_context(|| format!("Failed to open {port}"))?;
    info!(%port, "Connected");

    info!("--- Raw Communication Test ---");
    let mut mismatches = 0;
    let mut timeouts = 0;
    for unit in &cli.units {
        match query_position(&mut transport, *unit)? {
            Outcome::Matched(frame) => info!(
                unit,
                raw = frame.data,
                mm = %format!("{:.3}", frame.data as f64 * LSM_STEP_SIZE_MM),
                "Position"
            ),
            Outcome::Mismatched(frame) => {
                mismatches += 1;
                warn!(unit, "Unit id mismatch: {frame}");
            }
            Outcome::TimedOut(received) => {
                timeouts += 1;
                warn!(unit, received, "Timeout - no complete response");
            }
        }
        sleep(Duration::from_millis(200));
    }

    // Anything still arriving now was not asked for
    sleep(Duration::from_millis(500));
    let extra = transport.bytes_available()?;
    if extra > 0 {
        let leftover: Bytes = transport.read_exact(extra as usize, Duration::from_millis(100))?;
        warn!(count = extra, bytes = hex::encode(&leftover), "Extra bytes in buffer");
    }

    for delay_ms in &cli.timing {
        let results: Vec<String> = cli
            .units
            .iter()
            .map(|unit| {
                let outcome = query_position(&mut transport, *unit);
                sleep(Duration::from_millis(*delay_ms));
                match outcome {
                    Ok(Outcome::Matched(f)) => format!("ID{unit}:{:.1}mm", f.data as f64 * LSM_STEP_SIZE_MM),
                    Ok(Outcome::Mismatched(f)) => format!("ID{unit}:MISMATCH({})", f.unit_id),
                    Ok(Outcome::TimedOut(_)) => format!("ID{unit}:TIMEOUT"),
                    Err(e) => format!("ID{unit}:ERROR({e})"),
                }
            })
            .collect();
        info!("{delay_ms:>4} ms delay: {}", results.join(" | "));
    }

    transport.close()?;

    if mismatches > 0 {
        warn!("Unit ids mismatched: possible crosstalk or undrained responses");
    }
    if timeouts > 0 {
        warn!("Timeouts occurred: check cabling and controller power");
    }
    if mismatches == 0 && timeouts == 0 {
        info!("All units answered with matching ids");
    }
    Ok(())
}

fn query_position(transport: &mut SerialTransport, unit: u8) -> Result<Outcome> {
    let request = Frame::new(unit, Command::GetPosition, 0);
    transport.reset_buffers()?;
    info!(unit, bytes = hex::encode(request.to_bytes()), "Sending");
    transport.write(&request.to_bytes())?;

    match transport.read_exact(FRAME_SIZE, DEFAULT_TIMEOUT) {
        Ok(bytes) => {
            let reply = Frame::try_from(bytes)?;
            info!(unit, bytes = hex::encode(reply.to_bytes()), "Received");
            if reply.unit_id == unit {
                Ok(Outcome::Matched(reply))
            } else {
                Ok(Outcome::Mismatched(reply))
            }
        }
        Err(zstage_lib::StageError::Timeout { received, .. }) => Ok(Outcome::TimedOut(received)),
        Err(e) => Err(e.into()),
    }
}
