//! Event kind discriminant

use serde::{Deserialize, Serialize};

/// Kinds of recordable occurrences
///
/// The discriminant of [`EventPayload`](super::EventPayload); also the first
/// half of every data store index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Nondeterminism samples
    ClockSample,
    RandomSample,
    CryptoRandom,

    // Script engine
    ScriptCompile,
    ScriptRun,
    FunctionCall,
    CallbackInvocation,
    AttributeAccess,

    // DOM
    DomEventDispatch,
    DomAttribute,
    Navigation,

    // Scheduler
    TimerLifecycle,
    IdleCallback,
    AnimationFrame,

    // Storage and network
    StorageOp,
    ResourceFetch,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 16] = [
        EventKind::ClockSample,
        EventKind::RandomSample,
        EventKind::CryptoRandom,
        EventKind::ScriptCompile,
        EventKind::ScriptRun,
        EventKind::FunctionCall,
        EventKind::CallbackInvocation,
        EventKind::AttributeAccess,
        EventKind::DomEventDispatch,
        EventKind::DomAttribute,
        EventKind::Navigation,
        EventKind::TimerLifecycle,
        EventKind::IdleCallback,
        EventKind::AnimationFrame,
        EventKind::StorageOp,
        EventKind::ResourceFetch,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ClockSample => "clock_sample",
            EventKind::RandomSample => "random_sample",
            EventKind::CryptoRandom => "crypto_random",
            EventKind::ScriptCompile => "script_compile",
            EventKind::ScriptRun => "script_run",
            EventKind::FunctionCall => "function_call",
            EventKind::CallbackInvocation => "callback_invocation",
            EventKind::AttributeAccess => "attribute_access",
            EventKind::DomEventDispatch => "dom_event_dispatch",
            EventKind::DomAttribute => "dom_attribute",
            EventKind::Navigation => "navigation",
            EventKind::TimerLifecycle => "timer_lifecycle",
            EventKind::IdleCallback => "idle_callback",
            EventKind::AnimationFrame => "animation_frame",
            EventKind::StorageOp => "storage_op",
            EventKind::ResourceFetch => "resource_fetch",
        }
    }

    /// Clock and RNG draws consumed by the interceptor rather than the store
    pub fn is_sample(&self) -> bool {
        matches!(self, EventKind::ClockSample | EventKind::RandomSample)
    }

    /// Kinds delivered to the resource data store
    pub fn is_resource(&self) -> bool {
        matches!(self, EventKind::ResourceFetch)
    }

    /// Kinds produced by the timer / idle / animation-frame scheduler
    pub fn is_scheduler_event(&self) -> bool {
        matches!(
            self,
            EventKind::TimerLifecycle | EventKind::IdleCallback | EventKind::AnimationFrame
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = crate::error::ForensicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::error::ForensicError::UnknownEventKind {
                kind: s.to_string(),
            })
    }
}
