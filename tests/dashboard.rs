//! end-to-end: sources -> driver -> rendered page

use sensor_dashboard::config::{DashboardConfig, SourceKind};
use sensor_dashboard::dashboard::{Dashboard, DashboardView, RefreshOutcome};
use sensor_dashboard::domain::DevicePayload;
use sensor_dashboard::presenter::{NotificationLevel, Phase};
use sensor_dashboard::render::{render_page, DisplayZone};
use sensor_dashboard::session::Session;
use sensor_dashboard::source::memory::MemoryStore;
use sensor_dashboard::source::mock::MockSource;
use sensor_dashboard::source::rest::RestSource;
use sensor_dashboard::source::TelemetrySource;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const HOUR: Duration = Duration::from_secs(3600);

fn utc() -> DisplayZone {
    DisplayZone::Fixed(chrono::FixedOffset::east_opt(0).unwrap())
}

async fn wait_for(
    rx: &mut watch::Receiver<DashboardView>,
    f: impl FnMut(&DashboardView) -> bool,
) -> DashboardView {
    let view = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
        .await
        .expect("timed out")
        .expect("view channel closed");
    DashboardView::clone(&view)
}

#[tokio::test]
async fn realtime_reading_renders_as_card() {
    let store = MemoryStore::new();
    store.set(
        "lora-01",
        &DevicePayload {
            temperature: 21.5,
            humidity: 55.0,
            pressure: Some(1013.2),
            rssi: -65,
            uptime: Some(3661),
            timestamp: 1_700_000_000,
        },
    );

    let mut dashboard = Dashboard::start(
        TelemetrySource::Push(Arc::new(store.clone())),
        Session::signed_in("Operator"),
        HOUR,
    )
    .unwrap();
    let mut rx = dashboard.handle().subscribe();
    let view = wait_for(&mut rx, |v| v.snapshot.readings.len() == 1).await;

    let html = render_page(&view, &utc());
    assert!(html.contains("lora-01"));
    assert!(html.contains("21.5°C"));
    assert!(html.contains("55.0%"));
    assert!(html.contains("1013.2 hPa"));
    assert!(html.contains("-65 dBm"));
    assert!(html.contains("strong"));
    assert!(html.contains("1h 1m 1s"));
    assert!(html.contains("14/11/2023 22:13:20"));

    store.remove("lora-01");
    let view = wait_for(&mut rx, |v| v.snapshot.readings.is_empty()).await;
    assert!(render_page(&view, &utc()).contains("No sensors available right now"));

    dashboard.stop().await;
}

#[tokio::test]
async fn mock_source_fills_the_dashboard() {
    let devices = vec!["sensor1".to_string(), "sensor2".to_string()];
    let mut dashboard = Dashboard::start(
        TelemetrySource::Polling(Arc::new(MockSource::new(devices))),
        Session::signed_in("Operator"),
        HOUR,
    )
    .unwrap();
    let handle = dashboard.handle();
    let mut rx = handle.subscribe();

    let view = wait_for(&mut rx, |v| v.snapshot.readings.len() == 2 && !v.busy).await;
    let stats = view.snapshot.stats.expect("stats for a non-empty set");
    assert_eq!(stats.total, 2);
    assert!(stats.online <= 2);

    assert!(matches!(
        handle.refresh().await.unwrap(),
        RefreshOutcome::Started | RefreshOutcome::Coalesced
    ));
    dashboard.stop().await;
    assert_eq!(handle.current().snapshot.phase, Phase::Uninitialized);
}

async fn flaky_collector(State(calls): State<Arc<AtomicUsize>>) -> Response {
    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
        Json(json!([
            {"id": "n1", "temperature": 21.0, "humidity": 50, "rssi": -60, "last_updated": "2024-05-01T10:00:00"},
            {"id": "n2", "temperature": 23.0, "humidity": 52, "rssi": -95, "last_updated": "2024-05-01T10:01:00"}
        ]))
        .into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "collector exploded").into_response()
    }
}

#[tokio::test]
async fn rest_failure_keeps_last_readings() {
    let calls = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("/sensors/", get(flaky_collector))
        .with_state(calls.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let source = RestSource::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();
    let mut dashboard = Dashboard::start(
        TelemetrySource::Polling(Arc::new(source)),
        Session::signed_in("Operator"),
        HOUR,
    )
    .unwrap();
    let handle = dashboard.handle();
    let mut rx = handle.subscribe();

    let first = wait_for(&mut rx, |v| v.snapshot.readings.len() == 2 && !v.busy).await;
    let stats = first.snapshot.stats.clone().unwrap();
    assert_eq!((stats.online, stats.total), (1, 2));

    assert_eq!(handle.refresh().await.unwrap(), RefreshOutcome::Started);
    let failed = wait_for(&mut rx, |v| !v.busy && !v.notifications.is_empty()).await;

    assert_eq!(failed.snapshot.readings, first.snapshot.readings);
    assert_eq!(failed.snapshot.last_refreshed, first.snapshot.last_refreshed);
    assert_eq!(failed.notifications.len(), 1);
    assert_eq!(failed.notifications[0].level, NotificationLevel::Error);
    assert!(failed.notifications[0].message.contains("500"));

    let html = render_page(&failed, &utc());
    assert!(html.contains("toast error"));
    assert!(html.contains("21.0°C"));

    dashboard.stop().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn sample_config_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dashboard.toml");
    let config = DashboardConfig::load(path).unwrap();
    assert_eq!(config.source.kind, SourceKind::Mock);
    assert_eq!(config.source.realtime.node, "devices");
    assert!(config.session.user_display_name.is_some());
    assert!(TelemetrySource::from_config(&config.source, &config.polling).is_ok());
}
