//! Per-kind event payloads

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::fingerprint::RequestFingerprint;
use super::kind::EventKind;

/// Begin / End half of a paired call-site notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Begin,
    End,
}

/// Direction of an attribute access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDirection {
    Get,
    Set,
}

/// Which storage area a [`EventPayload::StorageOp`] touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Local,
    Session,
}

/// DOM attribute mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeOp {
    Modify,
    Remove,
}

/// Kind-specific data of an [`Event`](super::Event)
///
/// Serialized internally tagged on `kind`, so an envelope reads
/// `{"kind": "timer_lifecycle", "timer_id": 3, "phase": "begin", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// One observed wall-clock read, in milliseconds
    ClockSample { origin: String, value: f64 },

    /// One observed draw in `[0, 1)`
    RandomSample { origin: String, value: f64 },

    /// Values handed out by `crypto.getRandomValues`
    CryptoRandom { values: String },

    ScriptCompile {
        script_id: i64,
        line: u32,
        column: u32,
        url: String,
        /// Hex SHA-256 of the source text
        content_hash: String,
        size: usize,
    },

    ScriptRun {
        script_id: i64,
        #[serde(default)]
        result_repr: String,
        phase: Phase,
    },

    FunctionCall {
        script_id: i64,
        line: u32,
        column: u32,
        #[serde(default)]
        args_repr: Vec<String>,
        phase: Phase,
    },

    CallbackInvocation {
        interface: String,
        attribute: String,
        phase: Phase,
    },

    AttributeAccess {
        interface: String,
        attribute: String,
        #[serde(default)]
        value_repr: String,
        direction: AccessDirection,
    },

    DomEventDispatch {
        event_type: String,
        interface: String,
        #[serde(default)]
        target_interface: String,
        phase: Phase,
    },

    DomAttribute {
        node_id: i64,
        attr_name: String,
        #[serde(default)]
        old_value: Option<String>,
        #[serde(default)]
        new_value: Option<String>,
        op: AttributeOp,
    },

    Navigation { url: String },

    TimerLifecycle { timer_id: i64, phase: Phase },

    IdleCallback {
        callback_id: i64,
        #[serde(default)]
        callback_type: i32,
        #[serde(default)]
        allotted_time: f64,
        phase: Phase,
    },

    AnimationFrame {
        callback_id: i64,
        high_res_time: f64,
        #[serde(default)]
        is_legacy: bool,
        phase: Phase,
    },

    StorageOp {
        /// `getItem`, `setItem`, `key`, ...
        api_name: String,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        old_value: Option<String>,
        #[serde(default)]
        new_value: Option<String>,
        #[serde(default)]
        is_null: bool,
        #[serde(default)]
        index: Option<i64>,
        #[serde(default)]
        storage_kind: StorageKind,
    },

    ResourceFetch {
        request_fingerprint: RequestFingerprint,
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        mime_type: String,
        #[serde(default = "default_status")]
        status_code: u16,
        #[serde(default)]
        resource_type: String,
        #[serde(default)]
        body: String,
        #[serde(default)]
        is_streamed: bool,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ClockSample { .. } => EventKind::ClockSample,
            EventPayload::RandomSample { .. } => EventKind::RandomSample,
            EventPayload::CryptoRandom { .. } => EventKind::CryptoRandom,
            EventPayload::ScriptCompile { .. } => EventKind::ScriptCompile,
            EventPayload::ScriptRun { .. } => EventKind::ScriptRun,
            EventPayload::FunctionCall { .. } => EventKind::FunctionCall,
            EventPayload::CallbackInvocation { .. } => EventKind::CallbackInvocation,
            EventPayload::AttributeAccess { .. } => EventKind::AttributeAccess,
            EventPayload::DomEventDispatch { .. } => EventKind::DomEventDispatch,
            EventPayload::DomAttribute { .. } => EventKind::DomAttribute,
            EventPayload::Navigation { .. } => EventKind::Navigation,
            EventPayload::TimerLifecycle { .. } => EventKind::TimerLifecycle,
            EventPayload::IdleCallback { .. } => EventKind::IdleCallback,
            EventPayload::AnimationFrame { .. } => EventKind::AnimationFrame,
            EventPayload::StorageOp { .. } => EventKind::StorageOp,
            EventPayload::ResourceFetch { .. } => EventKind::ResourceFetch,
        }
    }

    /// Origin token of a clock / RNG sample
    pub fn origin(&self) -> Option<&str> {
        match self {
            EventPayload::ClockSample { origin, .. } | EventPayload::RandomSample { origin, .. } => {
                Some(origin)
            }
            _ => None,
        }
    }

    pub fn fingerprint(&self) -> Option<&RequestFingerprint> {
        match self {
            EventPayload::ResourceFetch {
                request_fingerprint,
                ..
            } => Some(request_fingerprint),
            _ => None,
        }
    }
}
