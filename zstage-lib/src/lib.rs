pub mod axis;
pub mod channel;
pub mod constants;
pub mod error;
pub mod frame;
pub mod mock;
pub mod monitor;
pub mod sensor;
pub mod session;
pub mod transport;


// Re-export the main types for easy access
pub use axis::{Axis, Position};
pub use channel::{AxisConfig, StageChannel};
pub use error::{ErrorKind, StageError};
pub use frame::{Command, Frame};
pub use session::{SessionConfig, StageSession};
pub use transport::{SerialTransport, SharedTransport, Transport};
