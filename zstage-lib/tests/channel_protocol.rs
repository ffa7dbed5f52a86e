//! Request/response behaviour of a single stage channel

mod common;

use common::*;

#[test]
fn test_move_to_mm_writes_expected_frame() {
    let mock = MockTransport::echo();
    let channel = x_channel(&mock);

    channel.move_to_mm(50.0, true).expect("well-formed ack should succeed");

    assert_eq!(mock.writes(), vec![hex_to_bytes("01140d051000")]);
}

#[test]
fn test_every_request_resets_buffers_first() {
    let mock = MockTransport::simulated();
    let channel = x_channel(&mock);

    channel.home().unwrap();
    channel.set_speed(100).unwrap();
    channel.get_position().unwrap();
    channel.move_to_step(10, false).unwrap();

    assert_eq!(mock.resets(), 4);
    assert_eq!(mock.writes().len(), 4);
}

#[test]
fn test_stale_bytes_do_not_answer_the_next_request() {
    let mock = MockTransport::simulated();
    mock.set_position(1, 1000);
    // An undrained reply from unit 2 left over from an earlier exchange
    mock.push_stale(&hex_to_bytes("023c10270000"));
    let channel = x_channel(&mock);

    let steps = channel.get_position_steps().unwrap();

    assert_eq!(steps, 1000);
}

#[test]
fn test_get_position_converts_steps_to_mm() {
    let mock = MockTransport::silent();
    mock.queue_reply(hex_to_bytes("013c558d2000"));
    let channel = x_channel(&mock);

    let position = channel.get_position().unwrap();

    assert!((position - 101.6).abs() < 1e-4, "got {position}");
    assert_eq!(mock.last_write(), Some(hex_to_bytes("013c00000000")));
}

#[test]
fn test_get_position_ignores_offset() {
    let mock = MockTransport::simulated();
    mock.set_position(1, 100_000);
    let mut channel = x_channel(&mock);
    channel.recalibrate(25.0).unwrap();

    let position = channel.get_position().unwrap();

    assert!((position - 100_000.0 * LSM_STEP_SIZE_MM).abs() < 1e-12);
}

#[test]
fn test_get_position_is_never_cached() {
    let mock = MockTransport::simulated();
    let channel = x_channel(&mock);

    mock.set_position(1, 10);
    assert_eq!(channel.get_position_steps().unwrap(), 10);
    mock.set_position(1, 20);
    assert_eq!(channel.get_position_steps().unwrap(), 20);
    assert_eq!(mock.writes().len(), 2);
}

#[test]
fn test_identity_mismatch_carries_context() {
    init_tracing();
    let mock = MockTransport::silent();
    mock.queue_reply(hex_to_bytes("023c10270000"));
    let channel = x_channel(&mock);

    match channel.get_position() {
        Err(StageError::IdentityMismatch { expected, received, raw }) => {
            assert_eq!(expected, 1);
            assert_eq!(received, 2);
            assert_eq!(raw.to_vec(), hex_to_bytes("023c10270000"));
        }
        other => panic!("expected IdentityMismatch, got {other:?}"),
    }
}

#[test]
fn test_identity_mismatch_on_every_waiting_command() {
    let mock = MockTransport::silent();
    let channel = x_channel(&mock);

    mock.queue_reply(hex_to_bytes("030100000000"));
    assert_eq!(channel.home().unwrap_err().kind(), ErrorKind::IdentityMismatch);

    mock.queue_reply(hex_to_bytes("031400000000"));
    assert_eq!(channel.move_to_step(5, true).unwrap_err().kind(), ErrorKind::IdentityMismatch);

    mock.queue_reply(hex_to_bytes("032400000000"));
    assert_eq!(channel.set_speed(5).unwrap_err().kind(), ErrorKind::IdentityMismatch);
}

#[test]
fn test_fire_and_forget_move_does_not_read() {
    let mock = MockTransport::silent();
    let channel = x_channel(&mock);

    let started = Instant::now();
    channel.move_to_step(1234, false).unwrap();

    assert!(started.elapsed() < TEST_TIMEOUT);
    assert_eq!(mock.last_write(), Some(Frame::new(1, Command::MoveAbsolute, 1234).to_bytes().to_vec()));
}

#[test]
fn test_move_to_step_clamps_to_travel_limit() {
    init_tracing();
    let mock = MockTransport::simulated();
    let channel = x_channel(&mock);

    channel.move_to_step(u32::MAX, true).unwrap();

    assert_eq!(mock.position(1), Some(LSM100A_TOTAL_STEPS));
}

#[test]
fn test_move_to_mm_clamps_both_ends() {
    init_tracing();
    let mock = MockTransport::simulated();
    let channel = x_channel(&mock);

    channel.move_to_mm(500.0, true).unwrap();
    assert_eq!(mock.position(1), Some(LSM100A_TOTAL_STEPS));

    channel.move_to_mm(-3.0, true).unwrap();
    assert_eq!(mock.position(1), Some(0));
}

#[test]
fn test_repeated_move_sends_identical_frames() {
    let mock = MockTransport::echo();
    let channel = x_channel(&mock);

    for _ in 0..3 {
        channel.move_to_mm(12.7, true).unwrap();
    }

    let writes = mock.writes();
    assert_eq!(writes.len(), 3);
    assert!(writes.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_set_speed_sends_value() {
    let mock = MockTransport::simulated();
    let channel = x_channel(&mock);

    channel.set_speed(0x0102_0304).unwrap();

    assert_eq!(mock.last_write(), Some(hex_to_bytes("012404030201")));
    assert_eq!(mock.speed(1), Some(0x0102_0304));
}

#[test]
fn test_response_command_byte_is_not_checked() {
    // Controllers may answer with a different reply code; only the unit id matters
    let mock = MockTransport::silent();
    mock.queue_reply(hex_to_bytes("01ff00000000"));
    let channel = x_channel(&mock);

    channel.home().unwrap();
}

#[test]
fn test_closed_transport_is_a_connection_error() {
    let mock = MockTransport::simulated();
    let link = SharedTransport::new(mock.clone());
    let channel = StageChannel::new(link.clone(), 1, LSM_STEP_SIZE_MM, LSM100A_TOTAL_STEPS).unwrap();

    link.close().unwrap();

    let err = channel.get_position().unwrap_err();
    assert!(matches!(err, StageError::Closed));
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(!err.is_retryable());
    assert!(mock.is_closed());
}
