//! Deadline behaviour when the controller does not answer

mod common;

use common::*;

fn assert_times_out<T: std::fmt::Debug>(name: &str, op: impl FnOnce() -> Result<T, StageError>) {
    let started = Instant::now();
    let result = op();
    let elapsed = started.elapsed();

    match result {
        Err(StageError::Timeout { expected, timeout, .. }) => {
            assert_eq!(expected, FRAME_SIZE, "{name}");
            assert_eq!(timeout, TEST_TIMEOUT, "{name}");
        }
        other => panic!("{name}: expected Timeout, got {other:?}"),
    }
    assert!(elapsed >= TEST_TIMEOUT, "{name} returned early after {elapsed:?}");
    assert!(
        elapsed <= TEST_TIMEOUT + TIMEOUT_SLACK,
        "{name} overran the deadline: {elapsed:?}"
    );
}

#[test]
fn test_every_waiting_operation_times_out() {
    let mock = MockTransport::silent();
    let channel = x_channel(&mock);

    assert_times_out("home", || channel.home());
    assert_times_out("move_to_step", || channel.move_to_step(10, true));
    assert_times_out("move_to_mm", || channel.move_to_mm(1.0, true));
    assert_times_out("get_position", || channel.get_position());
    assert_times_out("set_speed", || channel.set_speed(1));
}

#[test]
fn test_short_reply_times_out_and_is_discarded() {
    let mock = MockTransport::silent();
    mock.queue_reply(hex_to_bytes("013c55"));
    let channel = x_channel(&mock);

    match channel.get_position() {
        Err(StageError::Timeout { received, .. }) => assert_eq!(received, 3),
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert_eq!(mock.pending_input(), 0);
}

#[test]
fn test_timeout_is_retryable() {
    let mock = MockTransport::silent();
    let channel = x_channel(&mock);

    let err = channel.get_position().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.is_retryable());

    // A retry with a good reply succeeds; nothing from the failed call lingers
    mock.queue_reply(hex_to_bytes("013c0a000000"));
    assert_eq!(channel.get_position_steps().unwrap(), 10);
}
