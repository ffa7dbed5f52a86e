use clap::Parser;
use std::error::Error;
use std::io::{self, BufRead, Write};
use zstage_lib::{Axis, SessionConfig, StageSession};

/// Interactive jog mode: nudge axes from the keyboard
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "/dev/ttyUSB0", env = "ZSTAGE_PORT")]
    port: String,

    /// Jog distance per command in millimetres
    #[arg(short, long, default_value_t = 1.0)]
    step_mm: f64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

enum Input {
    Jog(Axis, f64),
    Print,
    Quit,
}

fn parse_input(line: &str, step_mm: f64) -> Option<Input> {
    let line = line.trim().to_ascii_lowercase();
    match line.as_str() {
        "q" | "quit" => return Some(Input::Quit),
        "p" => return Some(Input::Print),
        _ => {}
    }
    let (axis, sign) = line.split_at_checked(1)?;
    let axis = axis.parse::<Axis>().ok()?;
    match sign {
        "+" => Some(Input::Jog(axis, step_mm)),
        "-" => Some(Input::Jog(axis, -step_mm)),
        _ => None,
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .init();

    let session = StageSession::open(&SessionConfig::default().with_port(args.port.clone()))?;
    println!("Connected to {}", args.port);
    println!("{}", session.positions()?);
    println!("Commands: x+, x-, y+, y-, z+, z-, p, q");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match parse_input(&line, args.step_mm) {
            Some(Input::Quit) => break,
            Some(Input::Print) => match session.positions() {
                Ok(p) => println!("{p}"),
                Err(e) => eprintln!("Position read failed: {e}"),
            },
            Some(Input::Jog(axis, delta)) => {
                let channel = session.channel(axis)?;
                // Relative jog: read, then move; the channel clamps to travel
                let result = channel
                    .get_position()
                    .and_then(|current| channel.move_to_mm(current + delta, true))
                    .and_then(|_| channel.get_position());
                match result {
                    Ok(mm) => println!("{axis}: {mm:.2} mm"),
                    Err(e) if e.is_retryable() => eprintln!("{axis}: {e} (try again)"),
                    Err(e) => {
                        eprintln!("{axis}: {e}, halting");
                        break;
                    }
                }
            }
            None => println!("Unknown command"),
        }
    }

    session.close()?;
    println!("Done!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert!(matches!(parse_input("x+\n", 1.0), Some(Input::Jog(Axis::X, d)) if d == 1.0));
        assert!(matches!(parse_input(" Z- ", 0.5), Some(Input::Jog(Axis::Z, d)) if d == -0.5));
        assert!(matches!(parse_input("p", 1.0), Some(Input::Print)));
        assert!(matches!(parse_input("q", 1.0), Some(Input::Quit)));
        assert!(parse_input("w+", 1.0).is_none());
        assert!(parse_input("x*", 1.0).is_none());
        assert!(parse_input("", 1.0).is_none());
    }
}
