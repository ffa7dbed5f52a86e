//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use std::time::{Duration, Instant};
#[allow(unused_imports)]
pub use zstage_lib::constants::{FRAME_SIZE, LSM_STEP_SIZE_MM, LSM050A_TOTAL_STEPS, LSM100A_TOTAL_STEPS};
#[allow(unused_imports)]
pub use zstage_lib::error::{ErrorKind, StageError};
#[allow(unused_imports)]
pub use zstage_lib::frame::{Command, Frame};
#[allow(unused_imports)]
pub use zstage_lib::mock::MockTransport;
#[allow(unused_imports)]
pub use zstage_lib::{Axis, Position, SessionConfig, SharedTransport, StageChannel, StageSession};

/// Short deadline so timeout tests stay fast
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Slack allowed past the deadline for thread wake-up
#[allow(dead_code)]
pub const TIMEOUT_SLACK: Duration = Duration::from_millis(250);

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Vec<u8> {
    hex::decode(hex_data).expect("Failed to decode hex")
}

/// X axis of the bench, wired to the given mock
#[allow(dead_code)]
pub fn x_channel(mock: &MockTransport) -> StageChannel {
    StageChannel::new(SharedTransport::new(mock.clone()), 1, LSM_STEP_SIZE_MM, LSM100A_TOTAL_STEPS)
        .expect("valid channel")
        .with_timeout(TEST_TIMEOUT)
}

/// Route library logs through the test harness; filter with RUST_LOG.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
