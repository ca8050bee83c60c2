//! Persisting a recording and replaying it in a later session

use std::sync::Arc;

use forensic_core::resource::{InlineTaskRunner, RecordingConsumer};
use forensic_core::transport::raw::{RawLogParser, HANDLER_PREFIX};
use forensic_core::{
    EventKind, EventPayload, JsonlFileTransport, LogRecord, LogTransport, ManualClock,
    MemoryTransport, Phase, RequestFingerprint, SequenceEntropy, Session, StorageKind,
};
use parking_lot::Mutex;
use tempfile::TempDir;

static SERIAL: Mutex<()> = Mutex::new(());

fn raw_line(handler: &str, json: &str) -> String {
    let encoded = serde_json::to_string(json).unwrap();
    format!("[1:2:0101/000000.1:VERBOSE7] 4242:4311 || 1712345678.5 || {HANDLER_PREFIX}{handler} :{encoded}")
}

#[test]
fn jsonl_capture_replays_in_a_new_session() {
    let _serial = SERIAL.lock();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("captures").join("run.jsonl");

    {
        let transport = Arc::new(JsonlFileTransport::new(&path).unwrap());
        let session = Session::builder()
            .with_clock(Arc::new(ManualClock::new(100.0)))
            .with_entropy(Arc::new(SequenceEntropy::new([0.25, 0.75])))
            .with_transport(transport)
            .build()
            .unwrap();
        session.enable();
        session.interceptor().set_origin("https://a.example");

        session.start_record().unwrap();
        session.interceptor().sample_random();
        session.interceptor().sample_random();
        session.recorder().timer_event("F1", 11, Phase::Begin);
        session.recorder().storage_get_item("F1", "k", Some("v"), StorageKind::Local);
        session.stop_record().unwrap();
    }

    let session = Session::new().unwrap();
    session.enable();
    let loaded = session.load_log(&JsonlFileTransport::open_lenient(&path)).unwrap();
    assert_eq!(loaded, 4);

    session.interceptor().set_origin("https://a.example");
    session.start_replay().unwrap();
    assert_eq!(session.interceptor().sample_random(), 0.25);
    assert_eq!(session.interceptor().sample_random(), 0.75);
    assert_eq!(session.interceptor().sample_random(), -1.0);
    assert!(session.next_event("F1", EventKind::TimerLifecycle).is_some());
    assert_eq!(
        session.storage_replayer("F1").replay_get_item("k"),
        Some(Some("v".to_string()))
    );
}

#[test]
fn export_then_load_preserves_events() {
    let _serial = SERIAL.lock();
    let session = Session::new().unwrap();
    session.enable();

    session.start_record().unwrap();
    session.recorder().navigation("F1", "https://a.example/");
    session.recorder().timer_event("F1", 1, Phase::Begin);
    session.stop_record().unwrap();

    let exported = MemoryTransport::new();
    assert_eq!(session.export_log(&exported).unwrap(), 2);

    session.reset();
    assert!(session.store().is_empty());
    assert_eq!(session.load_log(&exported).unwrap(), 2);
    assert_eq!(session.store().len(), 2);
}

#[test]
fn bare_events_and_envelopes_are_both_accepted() {
    let _serial = SERIAL.lock();
    let session = Session::new().unwrap();
    session.enable();

    let bare = r#"{"frame_id":"F1","sequence_number":0,"logical_timestamp":5.0,"kind":"timer_lifecycle","timer_id":1,"phase":"begin"}"#;
    session.insert_event(bare).unwrap();

    let record = LogRecord::from_json(bare).unwrap();
    let mut second = record.event.clone();
    second.sequence_number = 1;
    session
        .insert_timer_lifecycle_event(&LogRecord::new(second).to_json().unwrap())
        .unwrap();

    assert_eq!(session.store().stream_len("F1", EventKind::TimerLifecycle), 2);
    assert!(session.insert_event(r#"{"kind":"timer_lifecycle"}"#).is_err());
}

#[test]
fn strict_jsonl_read_reports_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.jsonl");
    let good = LogRecord::new(forensic_core::Event::new(
        "F1",
        0,
        0.0,
        EventPayload::Navigation {
            url: "https://a.example/".to_string(),
        },
    ));
    std::fs::write(&path, format!("{}\nnot json\n", good.to_json().unwrap())).unwrap();

    let err = JsonlFileTransport::new(&path).unwrap().records().unwrap_err();
    assert_eq!(err.error_code(), "MALFORMED_LOG_LINE");
    assert!(err.to_string().contains("line 2"));
    assert_eq!(JsonlFileTransport::open_lenient(&path).count().unwrap(), 1);
}

#[test]
fn raw_browser_log_drives_a_replay() {
    let _serial = SERIAL.lock();
    let log = [
        raw_line("RecordTimerEventIDBeginInternal", r#"{"frame":"F1","timerID":3}"#),
        raw_line(
            "DumpV8RecordsInternal",
            r#"{"source":"RunScriptEnd","mathRandomNumbers":[{"securityToken":"a","values":["0.12","0.87"]}],"currentTimestamps":[]}"#,
        ),
        raw_line(
            "DidFinishLoadingResourceInternal",
            r#"{"frame":"F1","requestUrl":"https://x/y.png","statusCode":200,"body":"ABC"}"#,
        ),
    ]
    .join("\n");

    let mut parser = RawLogParser::new();
    let records: Vec<LogRecord> = parser.parse_str(&log).unwrap().into_iter().map(LogRecord::new).collect();
    assert_eq!(records.len(), 4);

    let session = Session::new().unwrap();
    session.enable();
    session.load_log(&MemoryTransport::from_records(records)).unwrap();
    session.start_replay().unwrap();

    assert_eq!(session.interceptor().sample_random_for("a"), 0.12);
    assert_eq!(session.interceptor().sample_random_for("a"), 0.87);
    assert!(session.next_event("F1", EventKind::TimerLifecycle).is_some());

    let consumer = Arc::new(RecordingConsumer::new());
    let fp = RequestFingerprint::new("GET|https://x/y.png");
    assert!(session.replay_fetch(&fp, consumer.clone(), &InlineTaskRunner));
    assert_eq!(consumer.body(), b"ABC".to_vec());
}
