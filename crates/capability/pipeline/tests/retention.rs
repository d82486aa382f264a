use domain::{Point, Sample};
use ems_pipeline::RetentionSweeper;
use ems_storage::{HistoryStore, InMemoryHistoryStore, InMemoryPointStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const DAY_MS: i64 = 86_400_000;

fn provisioned(point_id: i64, name: &str, table: Option<&str>) -> Point {
    Point {
        point_id,
        device_id: 1,
        name: name.to_string(),
        object_type: None,
        object_instance: None,
        register_type: Some("holding_register".to_string()),
        register_address: Some(point_id as u16),
        config: json!({}),
        is_monitor: true,
        is_history_enabled: true,
        table_name: table.map(str::to_string),
    }
}

async fn seed(history: &InMemoryHistoryStore, table: &str, stamps: &[i64]) {
    history.ensure_table(table).await.unwrap();
    for ts_ms in stamps {
        history
            .append_sample(
                table,
                &Sample {
                    ts_ms: *ts_ms,
                    value: 1.0,
                    quality: "good".to_string(),
                },
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn sweep_prunes_rows_past_horizon() {
    let points = Arc::new(InMemoryPointStore::new());
    let history = Arc::new(InMemoryHistoryStore::new());
    points
        .insert("Meter", provisioned(1, "kWh", Some("hist_meter_kwh")))
        .unwrap();
    points
        .insert("Meter", provisioned(2, "kW", Some("hist_meter_kw")))
        .unwrap();
    let now = 100 * DAY_MS;
    seed(&history, "hist_meter_kwh", &[now - 40 * DAY_MS, now - DAY_MS]).await;
    seed(&history, "hist_meter_kw", &[now - 31 * DAY_MS, now - 29 * DAY_MS]).await;

    let sweeper = RetentionSweeper::new(
        points,
        history.clone(),
        Duration::from_secs(30 * 86_400),
        Duration::from_secs(3600),
    );
    let report = sweeper.sweep_once(now).await.unwrap();

    assert_eq!(report.tables, 2);
    assert_eq!(report.rows_pruned, 2);
    assert_eq!(report.failures, 0);
    assert_eq!(history.row_count("hist_meter_kwh"), 1);
    assert_eq!(history.row_count("hist_meter_kw"), 1);
}

#[tokio::test]
async fn missing_table_is_counted_and_sweep_continues() {
    let points = Arc::new(InMemoryPointStore::new());
    let history = Arc::new(InMemoryHistoryStore::new());
    points
        .insert("Meter", provisioned(1, "kWh", Some("hist_meter_kwh")))
        .unwrap();
    points
        .insert("Meter", provisioned(2, "Voltage", Some("hist_meter_voltage")))
        .unwrap();
    seed(&history, "hist_meter_kwh", &[0, 10 * DAY_MS]).await;

    let sweeper = RetentionSweeper::new(
        points,
        history.clone(),
        Duration::from_secs(86_400),
        Duration::from_secs(3600),
    );
    let report = sweeper.sweep_once(10 * DAY_MS).await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(report.rows_pruned, 1);
    assert_eq!(history.row_count("hist_meter_kwh"), 1);
}

#[tokio::test]
async fn tracked_sweeper_stops_on_cancel() {
    let points = Arc::new(InMemoryPointStore::new());
    let history = Arc::new(InMemoryHistoryStore::new());
    points
        .insert("Meter", provisioned(1, "kWh", Some("hist_meter_kwh")))
        .unwrap();
    seed(&history, "hist_meter_kwh", &[0, DAY_MS]).await;

    let sweeper = RetentionSweeper::new(
        points,
        history.clone(),
        Duration::from_secs(86_400),
        Duration::from_secs(3600),
    );
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let token = cancel.clone();
    tracker.spawn(async move { sweeper.run(token).await });

    // 首个周期立即执行一次清理
    tokio::time::timeout(Duration::from_secs(1), async {
        while history.row_count("hist_meter_kwh") > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first sweep");

    cancel.cancel();
    tracker.close();
    tokio::time::timeout(Duration::from_secs(1), tracker.wait())
        .await
        .expect("sweeper exits after cancel");
    assert!(tracker.is_empty());
}
