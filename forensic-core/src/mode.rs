//! Session Mode Controller
//!
//! Process-wide `OFF / RECORDING / REPLAYING` state gating every
//! interception point. Reads are a single atomic load so call sites deep
//! inside script execution can consult it on every call; transitions are
//! serialized behind a mutex.
//!
//! ```text
//!   OFF ──► RECORDING ──► OFF
//!   OFF ──► REPLAYING ──► OFF
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ForensicError, Result};

/// The active session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionMode {
    Off = 0,
    Recording = 1,
    Replaying = 2,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Off => "OFF",
            SessionMode::Recording => "RECORDING",
            SessionMode::Replaying => "REPLAYING",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SessionMode::Recording,
            2 => SessionMode::Replaying,
            _ => SessionMode::Off,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized state machine over [`SessionMode`]
#[derive(Debug)]
pub struct ModeController {
    state: AtomicU8,
    transition: Mutex<()>,
}

impl ModeController {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionMode::Off as u8),
            transition: Mutex::new(()),
        }
    }

    /// Current mode. O(1), lock-free.
    #[inline]
    pub fn mode(&self) -> SessionMode {
        SessionMode::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.mode() == SessionMode::Recording
    }

    #[inline]
    pub fn is_replaying(&self) -> bool {
        self.mode() == SessionMode::Replaying
    }

    #[inline]
    pub fn is_off(&self) -> bool {
        self.mode() == SessionMode::Off
    }

    /// Move to `to`, returning the previous mode.
    ///
    /// On failure the prior mode is preserved.
    pub fn transition(&self, to: SessionMode) -> Result<SessionMode> {
        self.transition_with(to, |_| Ok(()))
    }

    /// Move to `to` and run `on_enter` while the transition lock is held.
    ///
    /// `on_enter` receives the previous mode. If it fails the mode is left
    /// unchanged.
    pub fn transition_with<F>(&self, to: SessionMode, on_enter: F) -> Result<SessionMode>
    where
        F: FnOnce(SessionMode) -> Result<()>,
    {
        let _guard = self.transition.lock();
        let from = self.mode();
        Self::check(from, to)?;
        on_enter(from)?;
        self.state.store(to as u8, Ordering::Release);
        info!(from = %from, to = %to, "session mode transition");
        Ok(from)
    }

    fn check(from: SessionMode, to: SessionMode) -> Result<()> {
        use SessionMode::*;
        match (from, to) {
            (Off, Recording) | (Off, Replaying) | (Recording, Off) | (Replaying, Off) => Ok(()),
            (Recording, Recording) => Err(ForensicError::AlreadyRecording),
            (Replaying, Replaying) => Err(ForensicError::AlreadyReplaying),
            _ => Err(ForensicError::InvalidModeTransition { from, to }),
        }
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}
