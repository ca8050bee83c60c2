//! Recorded network responses served back during replay

use std::sync::Arc;
use std::time::Duration;

use forensic_core::resource::{ConsumerCall, InlineTaskRunner, RecordingConsumer, ThreadTaskRunner};
use forensic_core::{
    FetchOutcome, ForensicConfig, RecordedResponse, RequestDescriptor, RequestFingerprint,
    ResourceConfig, Session, TaskRunner,
};
use parking_lot::Mutex;

static SERIAL: Mutex<()> = Mutex::new(());

fn session() -> Session {
    let config = ForensicConfig::default().with_stream_chunk_size(4);
    let session = Session::builder().with_config(config).build().expect("session");
    session.enable();
    session
}

fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out");
}

#[test]
fn recorded_fetch_is_served_buffered() {
    let _serial = SERIAL.lock();
    let session = session();
    let request = RequestDescriptor::new("GET", "https://x/y.png");
    assert_eq!(request.fingerprint(), RequestFingerprint::new("GET|https://x/y.png"));

    session.start_record().unwrap();
    session.recorder().resource_loaded(
        "F1",
        &request,
        RecordedResponse::new(200, "ABC").with_mime_type("image/png"),
    );
    session.stop_record().unwrap();

    session.start_replay().unwrap();
    let consumer = Arc::new(RecordingConsumer::new());
    assert!(session.replay_fetch(&request.fingerprint(), consumer.clone(), &InlineTaskRunner));

    let calls = consumer.calls();
    assert_eq!(calls.len(), 4);
    assert!(matches!(calls[0], ConsumerCall::StartLoad(_)));
    match &calls[1] {
        ConsumerCall::Response(response) => {
            assert_eq!(response.status_code, 200);
            assert_eq!(response.mime_type, "image/png");
            assert_eq!(response.url, "https://x/y.png");
        }
        other => panic!("expected response, got {:?}", other),
    }
    assert_eq!(calls[2], ConsumerCall::Data(b"ABC".to_vec()));
    assert_eq!(calls[3], ConsumerCall::Finished(3));
}

#[test]
fn streamed_fetch_is_chunked() {
    let _serial = SERIAL.lock();
    let session = session();
    let request = RequestDescriptor::new("GET", "https://x/feed").with_stream(true);

    session.start_record().unwrap();
    session.recorder().resource_loaded("F1", &request, RecordedResponse::new(200, "0123456789"));
    session.stop_record().unwrap();

    session.start_replay().unwrap();
    let consumer = Arc::new(RecordingConsumer::new());
    assert!(session.replay_fetch(&request.fingerprint(), consumer.clone(), &InlineTaskRunner));
    assert_eq!(consumer.chunk_count(), 3);
    assert_eq!(consumer.body(), b"0123456789".to_vec());
    assert_eq!(consumer.finish_count(), 1);
}

#[test]
fn unrecorded_fetch_falls_back_to_live() {
    let _serial = SERIAL.lock();
    let session = session();
    session.start_replay().unwrap();

    let consumer = Arc::new(RecordingConsumer::new());
    let fp = RequestFingerprint::new("GET|https://x/missing.js");
    assert!(!session.replay_fetch(&fp, consumer.clone(), &InlineTaskRunner));
    assert!(consumer.calls().is_empty());
    assert_eq!(session.stats().resources.misses, 1);
}

#[test]
fn empty_media_body_fails_like_a_stalled_load() {
    let _serial = SERIAL.lock();
    let session = session();
    let fp = RequestFingerprint::new("GET|https://x/clip.mp4");
    session
        .resources()
        .record_fetch(fp.clone(), RecordedResponse::new(200, "").with_resource_type("media"));

    session.start_replay().unwrap();
    let consumer = Arc::new(RecordingConsumer::new());
    assert!(session.replay_fetch(&fp, consumer.clone(), &InlineTaskRunner));
    assert!(!consumer.is_finished());
    assert!(matches!(consumer.calls().last(), Some(ConsumerCall::Failed(_))));
}

#[test]
fn waiting_fetch_resumes_once_response_arrives() {
    let _serial = SERIAL.lock();
    let session = session();
    session.start_replay().unwrap();

    let fp = RequestFingerprint::new("GET|https://x/late.css");
    let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::new("fetch-delivery").unwrap());
    let consumer = Arc::new(RecordingConsumer::new());

    assert_eq!(
        session.replay_fetch_or_wait(&fp, consumer.clone(), runner.clone()),
        FetchOutcome::Awaiting
    );
    assert!(session.resources().is_waiting(&fp));

    // a second consumer for the same fingerprint goes live
    let other = Arc::new(RecordingConsumer::new());
    assert_eq!(
        session.replay_fetch_or_wait(&fp, other.clone(), runner.clone()),
        FetchOutcome::Live
    );

    let event = RecordedResponse::new(200, "body{}")
        .with_url("https://x/late.css")
        .into_event(fp.clone(), "F1", 0, 1.0);
    session.insert_resource_fetch_event(&serde_json::to_string(&event).unwrap()).unwrap();

    wait_until(|| consumer.is_finished());
    assert_eq!(consumer.body(), b"body{}".to_vec());
    assert!(!session.resources().is_waiting(&fp));
    assert!(other.calls().is_empty());
}

#[test]
fn duplicate_fingerprint_keeps_first_response() {
    let _serial = SERIAL.lock();
    let session = session();
    let fp = RequestFingerprint::new("GET|https://x/a");
    assert!(session.resources().record_fetch(fp.clone(), RecordedResponse::new(200, "first")));
    assert!(!session.resources().record_fetch(fp.clone(), RecordedResponse::new(200, "second")));

    session.start_replay().unwrap();
    let consumer = Arc::new(RecordingConsumer::new());
    session.replay_fetch(&fp, consumer.clone(), &InlineTaskRunner);
    assert_eq!(consumer.body(), b"first".to_vec());
    assert_eq!(session.stats().resources.duplicates, 1);
}

#[test]
fn chunk_size_comes_from_config() {
    let config = ResourceConfig::default();
    assert_eq!(config.stream_chunk_size, 65_536);
    assert!(config.fail_empty_media);
}
