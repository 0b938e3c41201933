use pmoradio::{LiveMonitor, LiveSettings};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer) -> LiveSettings {
    LiveSettings {
        status_url: Some(format!("{}/live/status.json", server.uri())),
        poll_interval: Duration::from_millis(100),
        timeout: Duration::from_millis(300),
        ..LiveSettings::default()
    }
}

#[tokio::test]
async fn test_live_document_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/live/status.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "live": true,
            "title": "Friday session",
            "description": "Modular jam",
            "genre": "ambient, drone",
            "url": "https://stream.example.net/live.m3u8"
        })))
        .mount(&server)
        .await;

    let monitor = LiveMonitor::new(&settings(&server)).unwrap();
    let status = monitor.poll().await;

    assert!(status.is_live());
    assert_eq!(status.name, "Friday session");
    assert_eq!(status.genres, vec!["ambient", "drone"]);
    assert_eq!(
        status.source_link.as_deref(),
        Some("https://stream.example.net/live.m3u8")
    );
}

#[tokio::test]
async fn test_failures_read_as_offline() {
    let server = MockServer::start().await;
    let monitor = LiveMonitor::new(&settings(&server)).unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    assert!(!monitor.poll().await.is_live());

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    assert!(!monitor.poll().await.is_live());

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"live": true, "url": "https://x"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    assert!(!monitor.poll().await.is_live());
}

#[tokio::test]
async fn test_polling_publishes_transitions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"live": true, "url": "https://x"})),
        )
        .mount(&server)
        .await;

    let monitor = Arc::new(LiveMonitor::new(&settings(&server)).unwrap());
    let mut updates = monitor.subscribe();
    assert!(!monitor.current().is_live());

    let stop = CancellationToken::new();
    let poller = monitor.clone().spawn_polling(stop.clone());

    tokio::time::timeout(Duration::from_secs(3), updates.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(updates.borrow_and_update().is_live());

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    tokio::time::timeout(Duration::from_secs(3), updates.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(!monitor.current().is_live());

    stop.cancel();
    tokio::time::timeout(Duration::from_secs(2), poller)
        .await
        .unwrap()
        .unwrap();
}
