// Log assertions for serializer and registry boundaries.

mod common;

use common::{barrier, setup};
use livesql_core_types::schema::{EVENT_END, EVENT_END_ERROR, EVENT_START};
use livesql_logging::init_test_capture;

#[tokio::test]
async fn test_execute_and_live_query_boundaries_are_logged() {
    let capture = init_test_capture();
    let fx = setup().await;

    let handle = fx
        .live
        .live_query("SELECT value FROM t WHERE id = 1 /*logged*/", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;

    let fingerprint = "SELECT value FROM t WHERE id = 1 /*logged*/";
    let executes: Vec<_> = capture
        .events_for_op("execute")
        .into_iter()
        .filter(|e| e.field("fingerprint") == Some(fingerprint))
        .collect();
    assert_eq!(executes.len(), 1);
    assert_eq!(executes[0].event.as_deref(), Some(EVENT_START));
    assert_eq!(executes[0].field("params"), Some("***REDACTED***"));

    capture.assert_event_exists("execute", EVENT_END);
    let live_id = handle.live_id().to_string();
    let ends = capture.count_events(|e| {
        e.op.as_deref() == Some("live_query")
            && e.event.as_deref() == Some(EVENT_END)
            && e.field("live_id") == Some(live_id.as_str())
    });
    assert_eq!(ends, 1);
}

#[tokio::test]
async fn test_failed_statement_logs_error_code() {
    let capture = init_test_capture();
    let fx = setup().await;

    let _ = fx.live.query("SELECT * FROM log_missing_table", vec![]).await;

    let errors = capture.count_events(|e| {
        e.op.as_deref() == Some("execute")
            && e.event.as_deref() == Some(EVENT_END_ERROR)
            && e.field("err.code") == Some("ERR_ENGINE")
    });
    assert!(errors >= 1);
    capture.assert_event_exists("execute", EVENT_START);
}
