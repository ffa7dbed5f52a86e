use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use zstage_lib::{Axis, Position, SessionConfig, StageSession};

/// Drive the linear stages on a shared serial line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port the controllers are daisy-chained on.
    #[arg(short, long, default_value = "/dev/ttyUSB0", env = "ZSTAGE_PORT")]
    port: String,
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,
    /// Response timeout per exchange, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the position of every axis.
    Position {
        /// Report raw step counts instead of millimetres.
        #[arg(long)]
        steps: bool,
        #[arg(long)]
        json: bool,
    },
    /// Home the given axes in order (default: Y, X, Z).
    Home {
        #[arg(value_parser = parse_axis)]
        axes: Vec<Axis>,
    },
    /// Move to a position in millimetres; omitted axes stay where they are.
    Move {
        #[arg(long, allow_negative_numbers = true)]
        x: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        y: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        z: Option<f64>,
        /// Order in which axes are moved, e.g. "zyx".
        #[arg(long, default_value = "zyx")]
        order: String,
        /// Do not wait for the controllers to acknowledge.
        #[arg(long)]
        no_wait: bool,
    },
    /// Move one axis to an absolute step.
    Step {
        #[arg(value_parser = parse_axis)]
        axis: Axis,
        step: u32,
        #[arg(long)]
        no_wait: bool,
    },
    /// Send a speed value to one axis.
    Speed {
        #[arg(value_parser = parse_axis)]
        axis: Axis,
        value: u32,
    },
}

fn parse_axis(s: &str) -> Result<Axis, String> {
    s.parse::<Axis>().map_err(|_| format!("unknown axis '{s}', expected x, y or z"))
}

/// Target and move order restricted to the axes given on the command line.
/// Axes left out are neither read nor moved.
fn requested_move(x: Option<f64>, y: Option<f64>, z: Option<f64>, order: Vec<Axis>) -> (Position, Vec<Axis>) {
    let mut target = Position::default();
    let mut requested = Vec::new();
    for axis in order {
        let value = match axis {
            Axis::X => x,
            Axis::Y => y,
            Axis::Z => z,
        };
        if let Some(mm) = value {
            target[axis] = mm;
            requested.push(axis);
        }
    }
    (target, requested)
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

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

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli) {
        error!("Command failed: {:?}", e);
        process::exit(1);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = SessionConfig {
        port: cli.port.clone(),
        baud_rate: cli.baud,
        timeout: Duration::from_millis(cli.timeout_ms),
        ..SessionConfig::default()
    };
    let session = StageSession::open(&config).with_context(|| format!("Failed to open {}", cli.port))?;

    let result = execute(&session, cli.command);
    session.close()?;
    result
}

fn execute(session: &StageSession, command: Cmd) -> Result<()> {
    match command {
        Cmd::Position { steps, json } => {
            if steps {
                for axis in session.axes() {
                    let raw = session.channel(axis)?.get_position_steps()?;
                    println!("{axis}: {raw}");
                }
                return Ok(());
            }
            let position = session.positions().context("Failed to read positions")?;
            if json {
                println!("{}", serde_json::to_string(&position)?);
            } else {
                println!("X: {:.3} mm", position.x);
                println!("Y: {:.3} mm", position.y);
                println!("Z: {:.3} mm", position.z);
            }
        }
        Cmd::Home { axes } => {
            let order = if axes.is_empty() {
                vec![Axis::Y, Axis::X, Axis::Z]
            } else {
                axes
            };
            session.home_all(&order).context("Homing failed; motion halted")?;
            info!("Homing complete");
        }
        Cmd::Move {
            x,
            y,
            z,
            order,
            no_wait,
        } => {
            let order = Axis::parse_order(&order).ok_or_else(|| anyhow!("invalid axis order '{order}'"))?;
            let (target, requested) = requested_move(x, y, z, order);
            info!(axes = ?requested, ?x, ?y, ?z, "Moving");
            session
                .move_to_mm(target, &requested, !no_wait)
                .context("Move failed; motion halted")?;
            if !no_wait {
                for axis in requested {
                    println!("{axis}: {:.3} mm", session.channel(axis)?.get_position()?);
                }
            }
        }
        Cmd::Step { axis, step, no_wait } => {
            session.channel(axis)?.move_to_step(step, !no_wait)?;
        }
        Cmd::Speed { axis, value } => {
            session.channel(axis)?.set_speed(value)?;
        }
    }
    Ok(())
}
