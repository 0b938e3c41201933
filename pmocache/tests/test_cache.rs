//! Integration tests for pmocache against a mock blob store

use pmocache::{
    upload_missing, BlobStore, CachePlan, Error, HttpBlobStore, RetryPolicy, TrackCache,
};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AUDIO: &[u8] = b"ID3\x04\x00fake mp3 payload";

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5))
}

async fn setup(server: &MockServer) -> (TempDir, Arc<TrackCache>) {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(HttpBlobStore::new(server.uri()).unwrap());
    let cache = TrackCache::new(temp_dir.path().join("temp"), store, fast_retry()).unwrap();
    (temp_dir, Arc::new(cache))
}

async fn mount_track(server: &MockServer, id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{}.mp3", id)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(AUDIO))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_ensure_downloads_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/abc.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(AUDIO))
        .expect(1)
        .mount(&server)
        .await;

    let (_tmp, cache) = setup(&server).await;

    let first = cache.ensure("abc").await.unwrap();
    let second = cache.ensure("abc").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(std::fs::read(&first).unwrap(), AUDIO);
    assert!(!cache.dir().join("abc.mp3.part").exists());
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.mp3"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_track(&server, "flaky").await;

    let (_tmp, cache) = setup(&server).await;

    let path = cache.ensure("flaky").await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), AUDIO);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down.mp3"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let (_tmp, cache) = setup(&server).await;

    match cache.ensure("down").await {
        Err(Error::Exhausted { id, attempts, .. }) => {
            assert_eq!(id, "down");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!cache.is_cached("down").await);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let (_tmp, cache) = setup(&server).await;

    let err = cache.ensure("gone").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_sliding_window_bounds_disk_usage() {
    let server = MockServer::start().await;
    let ids: Vec<String> = (0..10).map(|i| format!("t{}", i)).collect();
    for id in &ids {
        mount_track(&server, id).await;
    }

    let (_tmp, cache) = setup(&server).await;

    for i in 0..ids.len() {
        let n = ids.len();
        let plan = CachePlan {
            current: ids[i].clone(),
            upcoming: vec![ids[(i + 1) % n].clone(), ids[(i + 2) % n].clone()],
            previous: Some(ids[(i + n - 1) % n].clone()),
        };
        cache.apply(&plan).await.unwrap();
        for id in &plan.upcoming {
            cache.ensure(id).await.unwrap();
        }

        let cached = cache.cached_ids().await.unwrap();
        assert!(cached.len() <= 3, "cache holds {:?}", cached);
        assert!(cached.contains(&ids[i]));
    }
}

#[tokio::test]
async fn test_evict_does_not_break_open_reader() {
    let server = MockServer::start().await;
    mount_track(&server, "playing").await;

    let (_tmp, cache) = setup(&server).await;
    let path = cache.ensure("playing").await.unwrap();

    let mut reader = std::fs::File::open(&path).unwrap();
    assert!(cache.evict("playing").await);
    assert!(!path.exists());

    let mut content = Vec::new();
    reader.read_to_end(&mut content).unwrap();
    assert_eq!(content, AUDIO);

    assert!(!cache.evict("playing").await);
}

#[tokio::test]
async fn test_upload_missing_only() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/present.mp3"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/absent.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/absent.mp3"))
        .and(header("x-amz-storage-class", "STANDARD"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let archives = tempfile::tempdir().unwrap();
    std::fs::write(archives.path().join("absent.mp3"), AUDIO).unwrap();
    std::fs::write(archives.path().join("present.mp3"), AUDIO).unwrap();

    let store = HttpBlobStore::new(server.uri()).unwrap();
    assert!(store.exists("present").await.unwrap());

    let report = upload_missing(
        &store,
        archives.path(),
        "mp3",
        ["present", "absent"],
        "STANDARD",
    )
    .await
    .unwrap();

    assert_eq!(report.uploaded, vec!["absent"]);
    assert_eq!(report.skipped, vec!["present"]);
    assert!(report.failed.is_empty());
}
