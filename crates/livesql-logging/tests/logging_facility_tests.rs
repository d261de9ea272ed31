#![allow(clippy::unwrap_used, clippy::expect_used)]

use livesql_core_types::schema::{EVENT_END, EVENT_END_ERROR, EVENT_START};
use livesql_errors::{ExError, ExErrorKind, LiveError};
use livesql_logging::test_capture::init_test_capture;
use livesql_logging::{log_op_end, log_op_error, log_op_start};

#[test]
fn test_log_op_start_macro() {
    let capture = init_test_capture();
    let op_name = "test_log_op_start_unique_1";

    log_op_start!(op_name);

    let starts = capture.count_events(|e| {
        e.op.as_deref() == Some(op_name) && e.event.as_deref() == Some(EVENT_START)
    });
    assert_eq!(starts, 1);
}

#[test]
fn test_log_op_end_macro_records_duration() {
    let capture = init_test_capture();
    let op_name = "test_log_op_end_unique_2";

    log_op_end!(op_name, duration_ms = 42u64, row_count = 3usize);

    let events = capture.events_for_op(op_name);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.as_deref(), Some(EVENT_END));
    assert_eq!(events[0].field("duration_ms"), Some("42"));
    assert_eq!(events[0].field("row_count"), Some("3"));
}

#[test]
fn test_log_op_error_includes_code() {
    let capture = init_test_capture();
    let op_name = "test_log_op_error_unique_3";

    let err = LiveError::DuplicateRowKey {
        column: "k".to_string(),
        key: "1".to_string(),
    };
    log_op_error!(op_name, err, duration_ms = 10u64);

    let events = capture.events_for_op(op_name);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.as_deref(), Some(EVENT_END_ERROR));
    assert_eq!(events[0].field("err.code"), Some("ERR_CONSISTENCY"));
}

#[test]
fn test_log_op_error_accepts_ex_error() {
    let capture = init_test_capture();
    let op_name = "test_log_op_error_unique_4";

    let err = ExError::new(ExErrorKind::Engine).with_message("boom");
    log_op_error!(op_name, err.clone(), duration_ms = 1u64, live_id = 5u64);

    let events = capture.events_for_op(op_name);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].field("err.code"), Some("ERR_ENGINE"));
    assert_eq!(events[0].field("live_id"), Some("5"));
}
