// Integration tests for full-refresh live queries: dedup, invalidation,
// fan-out, failure handling and teardown.

mod common;

use common::{barrier, setup, setup_with_config, Updates};
use futures::future::join_all;
use livesql_core::{ExErrorKind, Value};
use livesql_live::{LiveConfig, LiveUpdate};
use std::sync::{Arc, Mutex};

const ALL_ROWS: &str = "SELECT id, value FROM t ORDER BY id";

fn value_of(update: &LiveUpdate, id: i64) -> Option<Value> {
    let snap = &update.as_ref().ok()?.snapshot;
    snap.rows()
        .iter()
        .find(|r| r.values()[0] == Value::Integer(id))
        .map(|r| r.values()[1].clone())
}

#[tokio::test]
async fn test_live_query_resolves_with_initial_results() {
    let fx = setup().await;

    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();

    let current = handle.current();
    assert_eq!(current.snapshot.len(), 3);
    assert!(current.delta.is_none());
    assert_eq!(fx.live.registry().active_queries(), 1);
}

#[tokio::test]
async fn test_identical_requests_share_one_initial_run() {
    let fx = setup().await;

    let padded = format!("{}  ;", ALL_ROWS);
    let (a, b) = tokio::join!(
        fx.live.live_query(ALL_ROWS, vec![]),
        fx.live.live_query(&padded, vec![]),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(fx.log.count(ALL_ROWS), 1);
    assert_eq!(a.live_id(), b.live_id());
    assert_ne!(a.id(), b.id());
    assert!(Arc::ptr_eq(&a.current().snapshot, &b.current().snapshot));
}

#[tokio::test]
async fn test_late_joiner_gets_resolved_snapshot_without_engine_run() {
    let fx = setup().await;

    let _first = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let second = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();

    assert_eq!(fx.log.count(ALL_ROWS), 1);
    assert_eq!(second.current().snapshot.len(), 3);
}

#[tokio::test]
async fn test_different_params_are_separate_live_queries() {
    let fx = setup().await;
    let sql = "SELECT value FROM t WHERE id = ?1";

    let one = fx.live.live_query(sql, vec![Value::Integer(1)]).await.unwrap();
    let two = fx.live.live_query(sql, vec![Value::Integer(2)]).await.unwrap();

    assert_ne!(one.live_id(), two.live_id());
    assert_eq!(fx.live.registry().active_queries(), 2);
    assert_eq!(one.current().snapshot.rows()[0].values()[0], Value::from("a"));
    assert_eq!(two.current().snapshot.rows()[0].values()[0], Value::from("b"));
}

#[tokio::test]
async fn test_mutation_reruns_affected_query() {
    let fx = setup().await;
    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let updates = Updates::default();
    handle.subscribe(updates.callback()).unwrap();

    fx.live
        .query("UPDATE t SET value = 'z' WHERE id = 2", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;

    let received = updates.take();
    assert_eq!(received.len(), 1);
    assert_eq!(value_of(&received[0], 2), Some(Value::from("z")));
    assert_eq!(value_of(&Ok(handle.current()), 2), Some(Value::from("z")));
    assert_eq!(fx.log.count(ALL_ROWS), 2);
}

#[tokio::test]
async fn test_unrelated_mutation_does_not_rerun() {
    let fx = setup().await;
    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let updates = Updates::default();
    handle.subscribe(updates.callback()).unwrap();

    fx.live
        .query("INSERT INTO other (x) VALUES (1)", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;

    assert_eq!(updates.len(), 0);
    assert_eq!(fx.log.count(ALL_ROWS), 1);
}

#[tokio::test]
async fn test_fan_out_follows_registration_order() {
    let fx = setup().await;
    let a = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let b = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for (handle, tag) in [(&a, 1), (&b, 2), (&a, 3)] {
        let order = Arc::clone(&order);
        handle
            .subscribe(move |_: &LiveUpdate| order.lock().unwrap().push(tag))
            .unwrap();
    }

    fx.live
        .query("DELETE FROM t WHERE id = 3", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_subscribers_never_observe_older_snapshots() {
    let fx = setup().await;
    let handle = fx
        .live
        .live_query("SELECT value FROM t WHERE id = 1", vec![])
        .await
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    handle
        .subscribe(move |update: &LiveUpdate| {
            if let Ok(results) = update {
                if let Value::Text(s) = &results.snapshot.rows()[0].values()[0] {
                    sink.lock().unwrap().push(s.parse::<i64>().unwrap());
                }
            }
        })
        .unwrap();

    let writes: Vec<_> = (0..20)
        .map(|i| {
            fx.live.query(
                "UPDATE t SET value = ?1 WHERE id = 1",
                vec![Value::from(i.to_string())],
            )
        })
        .collect();
    for result in join_all(writes).await {
        result.unwrap();
    }
    barrier(&fx.live).await;

    let seen = seen.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "out of order: {:?}", seen);
    assert_eq!(seen.last(), Some(&19));
}

#[tokio::test]
async fn test_queued_reruns_are_coalesced() {
    let fx = setup().await;
    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let updates = Updates::default();
    handle.subscribe(updates.callback()).unwrap();

    let gated = fx.live.query("SELECT 1 /*gate*/", vec![]);
    let writes: Vec<_> = (4..7)
        .map(|id| {
            fx.live.query(
                "INSERT INTO t (id, value) VALUES (?1, 'new')",
                vec![Value::Integer(id)],
            )
        })
        .collect();
    fx.gate.open();
    gated.await.unwrap();
    for result in join_all(writes).await {
        result.unwrap();
    }
    barrier(&fx.live).await;

    assert_eq!(fx.log.count(ALL_ROWS), 2);
    let received = updates.take();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].as_ref().unwrap().snapshot.len(), 6);
}

#[tokio::test]
async fn test_reruns_not_coalesced_when_disabled() {
    let config = LiveConfig {
        coalesce_reruns: false,
        ..LiveConfig::default()
    };
    let fx = setup_with_config(config).await;
    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let updates = Updates::default();
    handle.subscribe(updates.callback()).unwrap();

    let gated = fx.live.query("SELECT 1 /*gate*/", vec![]);
    let writes: Vec<_> = (4..7)
        .map(|id| {
            fx.live.query(
                "INSERT INTO t (id, value) VALUES (?1, 'new')",
                vec![Value::Integer(id)],
            )
        })
        .collect();
    fx.gate.open();
    gated.await.unwrap();
    for result in join_all(writes).await {
        result.unwrap();
    }
    barrier(&fx.live).await;

    assert_eq!(fx.log.count(ALL_ROWS), 4);
    assert_eq!(updates.len(), 3);
}

#[tokio::test]
async fn test_refresh_reruns_and_delivers() {
    let fx = setup().await;
    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let updates = Updates::default();
    handle.subscribe(updates.callback()).unwrap();

    handle.refresh().unwrap();
    barrier(&fx.live).await;

    assert_eq!(fx.log.count(ALL_ROWS), 2);
    assert_eq!(updates.len(), 1);
}

#[tokio::test]
async fn test_failed_rerun_delivers_error_and_keeps_last_good() {
    let fx = setup().await;
    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let updates = Updates::default();
    handle.subscribe(updates.callback()).unwrap();

    fx.live.query("DROP TABLE t", vec![]).await.unwrap();
    barrier(&fx.live).await;

    let received = updates.take();
    assert_eq!(received.len(), 1);
    let err = received[0].as_ref().unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::Engine);
    assert_eq!(err.live_id(), Some(handle.live_id()));
    assert_eq!(handle.current().snapshot.len(), 3);
    assert_eq!(fx.live.registry().active_queries(), 1);

    fx.live
        .query("CREATE TABLE t (id INTEGER PRIMARY KEY, value TEXT)", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;

    let received = updates.take();
    assert_eq!(received.len(), 1);
    assert!(received[0].as_ref().unwrap().snapshot.is_empty());
}

#[tokio::test]
async fn test_initial_failure_fails_every_waiter_and_unregisters() {
    let fx = setup().await;
    let sql = "SELECT * FROM missing_table";

    let (a, b) = tokio::join!(
        fx.live.live_query(sql, vec![]),
        fx.live.live_query(sql, vec![]),
    );

    assert_eq!(a.unwrap_err().kind(), ExErrorKind::Engine);
    assert_eq!(b.unwrap_err().kind(), ExErrorKind::Engine);
    assert_eq!(fx.log.count(sql), 1);
    assert_eq!(fx.live.registry().active_queries(), 0);
}

#[tokio::test]
async fn test_removing_last_subscriber_tears_down() {
    let fx = setup().await;
    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let sub = handle.subscribe(|_: &LiveUpdate| {}).unwrap();

    handle.unsubscribe(sub);

    assert_eq!(fx.live.registry().active_queries(), 0);
    assert!(handle.is_detached());
    assert_eq!(
        handle.subscribe(|_: &LiveUpdate| {}).unwrap_err().kind(),
        ExErrorKind::Detached
    );

    fx.live
        .query("UPDATE t SET value = 'z' WHERE id = 1", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;
    assert_eq!(fx.log.count(ALL_ROWS), 1);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let fx = setup().await;
    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let keep = handle.subscribe(|_: &LiveUpdate| {}).unwrap();
    let gone = handle.subscribe(|_: &LiveUpdate| {}).unwrap();

    handle.unsubscribe(gone);
    handle.unsubscribe(gone);

    assert_eq!(fx.live.registry().active_queries(), 1);
    handle.unsubscribe(keep);
    assert_eq!(fx.live.registry().active_queries(), 0);
}

#[tokio::test]
async fn test_other_handle_keeps_query_alive() {
    let fx = setup().await;
    let a = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let b = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let updates = Updates::default();
    b.subscribe(updates.callback()).unwrap();

    drop(a);
    assert_eq!(fx.live.registry().active_queries(), 1);

    fx.live
        .query("UPDATE t SET value = 'z' WHERE id = 1", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;
    assert_eq!(updates.len(), 1);
}

#[tokio::test]
async fn test_callback_may_submit_statements() {
    let fx = setup().await;
    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let live = fx.live.clone();
    handle
        .subscribe(move |_: &LiveUpdate| {
            // Queued behind the current run; never awaited here.
            drop(live.query("INSERT INTO other (x) VALUES (42)", vec![]));
        })
        .unwrap();

    fx.live
        .query("UPDATE t SET value = 'z' WHERE id = 1", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;

    let snap = fx.live.query("SELECT x FROM other", vec![]).await.unwrap();
    assert_eq!(snap.rows()[0].values()[0], Value::Integer(42));
    handle.dispose();
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_fan_out() {
    let fx = setup().await;
    let handle = fx.live.live_query(ALL_ROWS, vec![]).await.unwrap();
    let updates = Updates::default();
    handle
        .subscribe(|_: &LiveUpdate| panic!("subscriber bug"))
        .unwrap();
    handle.subscribe(updates.callback()).unwrap();

    fx.live
        .query("UPDATE t SET value = 'z' WHERE id = 1", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;

    assert_eq!(updates.len(), 1);
}

#[tokio::test]
async fn test_empty_statement_is_rejected() {
    let fx = setup().await;
    let err = fx.live.live_query("   ", vec![]).await.unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_trigger_into_without_rowid_table_reruns_query() {
    let fx = setup().await;
    for sql in [
        "CREATE TABLE tally (k TEXT PRIMARY KEY, n INTEGER) WITHOUT ROWID",
        "INSERT INTO tally VALUES ('t', 0)",
        "CREATE TRIGGER t_tally AFTER INSERT ON t BEGIN UPDATE tally SET n = n + 1; END",
    ] {
        fx.live.query(sql, vec![]).await.unwrap();
    }
    let handle = fx.live.live_query("SELECT n FROM tally", vec![]).await.unwrap();

    fx.live
        .query("INSERT INTO t (id, value) VALUES (4, 'd')", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;
    assert_eq!(handle.current().snapshot.rows()[0].values()[0], Value::Integer(1));

    fx.live
        .query("UPDATE OR REPLACE tally SET n = 42", vec![])
        .await
        .unwrap();
    barrier(&fx.live).await;
    assert_eq!(handle.current().snapshot.rows()[0].values()[0], Value::Integer(42));
}
