//! Raw browser log lines
//!
//! Instrumented builds write one line per recorder callback:
//!
//! ```text
//! 4242:4311 || 1712345678.123456 || LOG::Forensics::RecordTimerEventIDBeginInternal :"{\"frame\":\"F1\",\"timerID\":3}"
//! ```
//!
//! The payload is a JSON string holding a JSON object (or, in older logs,
//! the object itself). [`RawLogParser`] turns the lines it understands into
//! events, assigning per-frame sequence numbers in line order. Lines from
//! handlers it does not know are counted and skipped.

use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{ForensicError, Result};
use crate::event::{
    AccessDirection, AttributeOp, Event, EventPayload, Phase, RequestDescriptor, StorageKind,
};
use crate::interceptor::SampleKind;

/// Handler prefix on every forensic line
pub const HANDLER_PREFIX: &str = "LOG::Forensics::";

/// Frame id used when a line carries none
pub const UNKNOWN_FRAME: &str = "unknown";

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d+):(\d+) \|\| (\d+(?:\.\d+)?) \|\| LOG::Forensics::(\w+) :(.*)$")
            .unwrap_or_else(|e| unreachable!("invalid raw log pattern: {e}"))
    })
}

/// One matched line before interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct RawLine {
    pub pid: u64,
    pub tid: u64,
    /// Seconds since the Unix epoch
    pub seconds: f64,
    pub handler: String,
    pub entry: Value,
}

impl RawLine {
    /// Match a single line. `Ok(None)` for lines that are not forensic output.
    pub fn parse(line: &str, line_no: usize) -> Result<Option<Self>> {
        let Some(caps) = line_pattern().captures(line) else {
            return Ok(None);
        };
        let malformed = |reason: String| ForensicError::MalformedLogLine {
            line: line_no,
            reason,
        };

        let pid = caps[1].parse::<u64>().map_err(|e| malformed(e.to_string()))?;
        let tid = caps[2].parse::<u64>().map_err(|e| malformed(e.to_string()))?;
        let seconds = caps[3].parse::<f64>().map_err(|e| malformed(e.to_string()))?;
        let handler = caps[4].to_string();

        let mut entry: Value =
            serde_json::from_str(caps[5].trim()).map_err(|e| malformed(e.to_string()))?;
        // double-encoded payload
        if let Value::String(inner) = &entry {
            entry = serde_json::from_str(inner).map_err(|e| malformed(e.to_string()))?;
        }
        if !entry.is_object() {
            return Err(malformed("payload is not a JSON object".to_string()));
        }

        Ok(Some(Self {
            pid,
            tid,
            seconds,
            handler,
            entry,
        }))
    }
}

/// Parse counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawParseStats {
    pub lines: usize,
    pub matched: usize,
    pub events: usize,
    pub malformed: usize,
    pub skipped_handlers: BTreeMap<String, usize>,
}

/// Stateful converter from raw lines to events
#[derive(Debug, Default)]
pub struct RawLogParser {
    frame_sequences: HashMap<String, i64>,
    sample_sequences: HashMap<(String, SampleKind), i64>,
    stats: RawParseStats,
}

impl RawLogParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RawParseStats {
        &self.stats
    }

    /// Parse every line of `reader`. Malformed forensic lines are counted
    /// and skipped; I/O errors abort.
    pub fn parse_reader<R: BufRead>(&mut self, reader: R) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            match self.parse_line(&line, index + 1) {
                Ok(parsed) => events.extend(parsed),
                Err(err) => {
                    self.stats.malformed += 1;
                    debug!(error = %err, "skipping malformed forensic line");
                }
            }
        }
        Ok(events)
    }

    pub fn parse_str(&mut self, raw: &str) -> Result<Vec<Event>> {
        self.parse_reader(raw.as_bytes())
    }

    /// Parse one line into zero or more events
    pub fn parse_line(&mut self, line: &str, line_no: usize) -> Result<Vec<Event>> {
        self.stats.lines += 1;
        let Some(raw) = RawLine::parse(line, line_no)? else {
            return Ok(Vec::new());
        };
        self.stats.matched += 1;

        let events = self.interpret(&raw, line_no)?;
        if events.is_empty() {
            *self
                .stats
                .skipped_handlers
                .entry(raw.handler.clone())
                .or_insert(0) += 1;
            trace!(handler = %raw.handler, "no event for handler");
        }
        self.stats.events += events.len();
        Ok(events)
    }

    fn next_sequence(&mut self, frame: &str) -> i64 {
        let next = self.frame_sequences.entry(frame.to_string()).or_insert(0);
        let sequence = *next;
        *next += 1;
        sequence
    }

    fn interpret(&mut self, raw: &RawLine, line_no: usize) -> Result<Vec<Event>> {
        let entry = &raw.entry;
        let frame = str_field(entry, "frame").unwrap_or_else(|| UNKNOWN_FRAME.to_string());
        let timestamp = raw.seconds * 1000.0;
        let missing = |field: &str| ForensicError::MalformedLogLine {
            line: line_no,
            reason: format!("{} is missing '{}'", raw.handler, field),
        };

        let payload = match raw.handler.as_str() {
            "DumpV8RecordsInternal" => return Ok(self.samples(raw, &frame, timestamp)),

            "DidCompileScriptInternal" => EventPayload::ScriptCompile {
                script_id: i64_field(entry, "scriptID").ok_or_else(|| missing("scriptID"))?,
                line: i64_field(entry, "line").unwrap_or(0) as u32,
                column: i64_field(entry, "column").unwrap_or(0) as u32,
                url: str_field(entry, "url").unwrap_or_default(),
                content_hash: str_field(entry, "hash").unwrap_or_default(),
                size: i64_field(entry, "size").unwrap_or(0).max(0) as usize,
            },
            "DidRunCompiledScriptBeginInternal" | "DidRunCompiledScriptEndInternal" => {
                EventPayload::ScriptRun {
                    script_id: i64_field(entry, "scriptID").ok_or_else(|| missing("scriptID"))?,
                    result_repr: str_field(entry, "result").unwrap_or_default(),
                    phase: phase_of(&raw.handler),
                }
            }
            "DidCallFunctionBeginInternal" | "DidCallFunctionEndInternal" => {
                EventPayload::FunctionCall {
                    script_id: i64_field(entry, "scriptID").unwrap_or(0),
                    line: i64_field(entry, "line").unwrap_or(0) as u32,
                    column: i64_field(entry, "column").unwrap_or(0) as u32,
                    args_repr: string_list(entry, "args"),
                    phase: phase_of(&raw.handler),
                }
            }
            "DidCallCallbackStartInternal" | "DidCallCallbackEndInternal" => {
                EventPayload::CallbackInvocation {
                    interface: str_field(entry, "interface").ok_or_else(|| missing("interface"))?,
                    attribute: str_field(entry, "attribute").unwrap_or_default(),
                    phase: phase_of(&raw.handler),
                }
            }
            "DidCallV8GetAttributeInternal" | "DidCallV8SetAttributeInternal" => {
                EventPayload::AttributeAccess {
                    interface: str_field(entry, "interface").ok_or_else(|| missing("interface"))?,
                    attribute: str_field(entry, "attribute").ok_or_else(|| missing("attribute"))?,
                    value_repr: str_field(entry, "returnValue")
                        .or_else(|| str_field(entry, "value"))
                        .unwrap_or_default(),
                    direction: if raw.handler.contains("Set") {
                        AccessDirection::Set
                    } else {
                        AccessDirection::Get
                    },
                }
            }
            "RecordDispatchEventStartInternal" | "RecordDispatchEventEndInternal" => {
                EventPayload::DomEventDispatch {
                    event_type: str_field(entry, "eventType").ok_or_else(|| missing("eventType"))?,
                    interface: str_field(entry, "interfaceName").unwrap_or_default(),
                    target_interface: str_field(entry, "targetInterfaceName").unwrap_or_default(),
                    phase: phase_of(&raw.handler),
                }
            }
            "RecordTimerEventIDBeginInternal" | "RecordTimerEventIDEndInternal" => {
                EventPayload::TimerLifecycle {
                    timer_id: i64_field(entry, "timerID").ok_or_else(|| missing("timerID"))?,
                    phase: phase_of(&raw.handler),
                }
            }
            "RecordIdleCallbackEventBeginInternal" | "RecordIdleCallbackEventEndInternal" => {
                EventPayload::IdleCallback {
                    callback_id: i64_field(entry, "callbackId").ok_or_else(|| missing("callbackId"))?,
                    callback_type: i64_field(entry, "callbackType").unwrap_or(0) as i32,
                    allotted_time: f64_field(entry, "allottedTime").unwrap_or(0.0),
                    phase: phase_of(&raw.handler),
                }
            }
            "RecordRequestAnimationFrameEventBeginInternal"
            | "RecordRequestAnimationFrameEventEndInternal" => EventPayload::AnimationFrame {
                callback_id: i64_field(entry, "callbackId").ok_or_else(|| missing("callbackId"))?,
                high_res_time: f64_field(entry, "highResNowMs").unwrap_or(0.0),
                is_legacy: bool_field(entry, "isLegacyCall").unwrap_or(false),
                phase: phase_of(&raw.handler),
            },
            "RecordGetItemInternal" => EventPayload::StorageOp {
                api_name: "getItem".to_string(),
                key: str_field(entry, "key"),
                old_value: None,
                new_value: str_field(entry, "value"),
                is_null: bool_field(entry, "isNull").unwrap_or(false),
                index: None,
                storage_kind: storage_kind(entry),
            },
            "RecordKeyInternal" => EventPayload::StorageOp {
                api_name: "key".to_string(),
                key: str_field(entry, "key"),
                old_value: None,
                new_value: None,
                is_null: bool_field(entry, "isNull").unwrap_or(false),
                index: i64_field(entry, "index"),
                storage_kind: storage_kind(entry),
            },
            "CryptoRandomValuesInternal" => EventPayload::CryptoRandom {
                values: match entry.get("values") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => return Err(missing("values")),
                },
            },
            "FrameRequestedNavigationInternal" => EventPayload::Navigation {
                url: str_field(entry, "url").ok_or_else(|| missing("url"))?,
            },
            "DidModifyDOMAttrInternal" => EventPayload::DomAttribute {
                node_id: i64_field(entry, "nodeId").ok_or_else(|| missing("nodeId"))?,
                attr_name: str_field(entry, "attrName").ok_or_else(|| missing("attrName"))?,
                old_value: str_field(entry, "oldValue"),
                new_value: str_field(entry, "newValue"),
                op: AttributeOp::Modify,
            },
            "DidRemoveDOMAttrInternal" => EventPayload::DomAttribute {
                node_id: i64_field(entry, "nodeId").ok_or_else(|| missing("nodeId"))?,
                attr_name: str_field(entry, "removedAttr")
                    .or_else(|| str_field(entry, "attrName"))
                    .ok_or_else(|| missing("removedAttr"))?,
                old_value: None,
                new_value: None,
                op: AttributeOp::Remove,
            },
            "DidFinishLoadingResourceInternal" => resource_payload(entry).ok_or_else(|| missing("requestUrl"))?,
            _ => return Ok(Vec::new()),
        };

        let sequence = self.next_sequence(&frame);
        Ok(vec![Event::new(frame, sequence, timestamp, payload).with_thread(raw.tid)])
    }

    /// Expand a V8 record dump into per-origin sample events
    fn samples(&mut self, raw: &RawLine, frame: &str, timestamp: f64) -> Vec<Event> {
        let mut events = Vec::new();
        for (field, kind) in [
            ("currentTimestamps", SampleKind::Clock),
            ("mathRandomNumbers", SampleKind::Random),
        ] {
            let Some(Value::Array(groups)) = raw.entry.get(field) else {
                continue;
            };
            for group in groups {
                let Some(origin) = str_field(group, "securityToken") else {
                    continue;
                };
                let Some(Value::Array(values)) = group.get("values") else {
                    continue;
                };
                for value in values.iter().filter_map(number_of) {
                    let counter = self
                        .sample_sequences
                        .entry((origin.clone(), kind))
                        .or_insert(0);
                    let sequence = *counter;
                    *counter += 1;

                    let payload = match kind {
                        SampleKind::Clock => EventPayload::ClockSample {
                            origin: origin.clone(),
                            value,
                        },
                        SampleKind::Random => EventPayload::RandomSample {
                            origin: origin.clone(),
                            value,
                        },
                    };
                    events.push(Event::new(frame, sequence, timestamp, payload).with_thread(raw.tid));
                }
            }
        }
        events
    }
}

fn resource_payload(entry: &Value) -> Option<EventPayload> {
    let url = str_field(entry, "requestUrl").or_else(|| str_field(entry, "url"))?;
    let method = str_field(entry, "method").unwrap_or_else(|| "GET".to_string());
    let resource_type = str_field(entry, "resourceType").unwrap_or_default();
    let is_streamed = bool_field(entry, "useStream").unwrap_or(false);

    let mut descriptor = RequestDescriptor::new(method.clone(), url.clone())
        .with_resource_type(resource_type.clone())
        .with_stream(is_streamed);
    if let Some(origin) = str_field(entry, "origin") {
        descriptor = descriptor.with_origin(origin);
    }

    let headers = match entry.get("headers") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    };

    Some(EventPayload::ResourceFetch {
        request_fingerprint: descriptor.fingerprint(),
        url,
        method,
        headers,
        mime_type: str_field(entry, "mimeType").unwrap_or_default(),
        status_code: i64_field(entry, "statusCode").unwrap_or(200).clamp(0, u16::MAX as i64) as u16,
        resource_type,
        body: str_field(entry, "body").unwrap_or_default(),
        is_streamed,
    })
}

fn phase_of(handler: &str) -> Phase {
    if handler.contains("End") {
        Phase::End
    } else {
        Phase::Begin
    }
}

fn storage_kind(entry: &Value) -> StorageKind {
    match str_field(entry, "type").as_deref() {
        Some(t) if t.eq_ignore_ascii_case("session") || t.eq_ignore_ascii_case("sessionStorage") => {
            StorageKind::Session
        }
        _ => StorageKind::Local,
    }
}

fn str_field(entry: &Value, name: &str) -> Option<String> {
    match entry.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn f64_field(entry: &Value, name: &str) -> Option<f64> {
    number_of(entry.get(name)?)
}

fn i64_field(entry: &Value, name: &str) -> Option<i64> {
    match entry.get(name)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_field(entry: &Value, name: &str) -> Option<bool> {
    match entry.get(name)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn string_list(entry: &Value, name: &str) -> Vec<String> {
    match entry.get(name) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn line(handler: &str, json: &str) -> String {
        let encoded = serde_json::to_string(json).unwrap();
        format!("[1:2:0101/000000.1:VERBOSE7] 4242:4311 || 1712345678.5 || {HANDLER_PREFIX}{handler} :{encoded}")
    }

    #[test]
    fn test_timer_lines_get_frame_sequences() {
        let mut parser = RawLogParser::new();
        let log = [
            line("RecordTimerEventIDBeginInternal", r#"{"frame":"F1","timerID":3}"#),
            line("RecordTimerEventIDEndInternal", r#"{"frame":"F1","timerID":3}"#),
            line("RecordTimerEventIDBeginInternal", r#"{"frame":"F2","timerID":9}"#),
        ]
        .join("\n");

        let events = parser.parse_str(&log).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].sequence_number, 1);
        assert_eq!(events[2].sequence_number, 0);
        assert_eq!(events[0].thread_id, 4311);
        assert_eq!(events[0].logical_timestamp, 1712345678500.0);
        assert!(matches!(
            events[1].payload,
            EventPayload::TimerLifecycle { timer_id: 3, phase: Phase::End }
        ));
    }

    #[test]
    fn test_v8_records_expand_to_samples() {
        let mut parser = RawLogParser::new();
        let json = r#"{"source":"RunScriptEnd",
            "mathRandomNumbers":[{"securityToken":"a","values":["0.12","0.87"]}],
            "currentTimestamps":[{"securityToken":"a","values":["1712345678000.5"]}]}"#;
        let events = parser.parse_str(&line("DumpV8RecordsInternal", json)).unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind(), EventKind::ClockSample);
        let randoms: Vec<f64> = events
            .iter()
            .filter_map(|e| match e.payload {
                EventPayload::RandomSample { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(randoms, vec![0.12, 0.87]);
        assert_eq!(events[2].sequence_number, 1);
    }

    #[test]
    fn test_unknown_handlers_and_noise_are_skipped() {
        let mut parser = RawLogParser::new();
        let log = format!(
            "some unrelated output\n{}\n",
            line("DidInsertDOMNodeInternal", r#"{"frame":"F1","nodeId":4}"#)
        );
        let events = parser.parse_str(&log).unwrap();
        assert!(events.is_empty());
        assert_eq!(parser.stats().matched, 1);
        assert_eq!(parser.stats().skipped_handlers["DidInsertDOMNodeInternal"], 1);
    }

    #[test]
    fn test_malformed_payload_is_counted() {
        let mut parser = RawLogParser::new();
        let log = format!("1:2 || 3.0 || {HANDLER_PREFIX}RecordKeyInternal :{{not json");
        assert!(parser.parse_str(&log).unwrap().is_empty());
        assert_eq!(parser.stats().malformed, 1);
    }

    #[test]
    fn test_storage_get_item() {
        let mut parser = RawLogParser::new();
        let events = parser
            .parse_str(&line(
                "RecordGetItemInternal",
                r#"{"frame":"F1","key":"k","value":"","isNull":true,"type":"local"}"#,
            ))
            .unwrap();
        assert_eq!(events[0].stream_key(), "F1/getItem");
        assert!(matches!(events[0].payload, EventPayload::StorageOp { is_null: true, .. }));
    }

    #[test]
    fn test_resource_line_fingerprint() {
        let mut parser = RawLogParser::new();
        let events = parser
            .parse_str(&line(
                "DidFinishLoadingResourceInternal",
                r#"{"frame":"F1","requestUrl":"https://x/y.png","statusCode":200,"body":"ABC"}"#,
            ))
            .unwrap();
        assert_eq!(events[0].stream_key(), "GET|https://x/y.png");
    }
}
