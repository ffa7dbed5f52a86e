use tracing::info;
use zstage_lib::transport::available_ports;

fn main() {
    // Initialize tracing (optional, but good for debugging)
    tracing_subscriber::fmt::init();

    info!("Listing serial ports...\n");

    match available_ports() {
        Ok(ports) => {
            for (count, port) in ports.iter().enumerate() {
                info!("Port #{}: {} ({})", count + 1, port.name, port.description);
            }
            if ports.is_empty() {
                info!("No serial ports found.");
            }
        }
        Err(e) => {
            eprintln!("Error listing serial ports: {:?}", e);
        }
    }
}
