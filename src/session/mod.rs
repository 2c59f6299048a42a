//! Session abstraction and telemetry value types
//!
//! A [`Session`] is one remote client taking part in a tuple. The engine
//! never talks to clients directly; everything goes through the
//! [`SessionProvider`] seam so the automation layer stays outside the crate.

pub mod scripted;

use std::fmt;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::common::Result;
use crate::config::SessionConfig;

pub use scripted::{ScriptedProvider, ScriptedRead, SessionScript};

/// Provider-assigned identifier for a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Live handle to one remote client, bound to one tuple slot
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub role: String,
    pub config: SessionConfig,
}

/// Named query a provider knows how to answer against a session,
/// e.g. `connection-state` or `stats`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Probe(String);

impl Probe {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One opaque value read from a session at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signal {
    /// Textual state, e.g. `connected`
    Text(String),
    /// Numeric counter or gauge
    Number(f64),
    /// Structured snapshot, e.g. a stats dump
    Json(serde_json::Value),
}

impl Signal {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn number(value: f64) -> Self {
        Self::Number(value)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Json(v) => v.as_f64(),
            Self::Text(_) => None,
        }
    }

    /// Drill into a structured signal with a JSON pointer,
    /// e.g. `/inbound/bytesReceived`
    pub fn pointer(&self, path: &str) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => v.pointer(path),
            _ => None,
        }
    }
}

impl From<&str> for Signal {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for Signal {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<serde_json::Value> for Signal {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Monotonic clock for one tuple execution.
///
/// Sample timestamps are milliseconds since the tuple started rather than
/// wall-clock time, so tolerance math is immune to clock adjustments and
/// exact under tokio's paused test clock.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    epoch: tokio::time::Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }

    /// Milliseconds elapsed since the tuple started
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Signals from every session of a tuple, captured as close to
/// simultaneously as the provider allows, in slot order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the owning tuple's execution started
    pub at_ms: u64,
    /// One signal per tuple slot, same order as the tuple's roles
    pub signals: Vec<Signal>,
}

impl Sample {
    pub fn new(at_ms: u64, signals: Vec<Signal>) -> Self {
        Self { at_ms, signals }
    }

    /// Stamp a freshly read signal set with the run clock
    pub fn capture(clock: &RunClock, signals: Vec<Signal>) -> Self {
        Self {
            at_ms: clock.now_ms(),
            signals,
        }
    }
}

/// Bridge to the external automation layer.
///
/// `read` failing with [`Error::SessionCrashed`](crate::Error::SessionCrashed)
/// marks the session dead; the tuple runner may then release it and acquire
/// a replacement. Any other error means the probe could not be answered.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Acquire a live session for one tuple slot
    async fn acquire(&self, role: &str, config: &SessionConfig) -> Result<Session>;

    /// Release a session; called exactly once per acquired session
    async fn release(&self, session: Session);

    /// Read one signal from one session
    async fn read(&self, session: &Session, probe: &Probe) -> Result<Signal>;

    /// Read every session concurrently, one signal each, slot order
    /// preserved. The first error wins.
    async fn sample_all(&self, sessions: &[Session], probe: &Probe) -> Result<Vec<Signal>> {
        let reads = sessions.iter().map(|session| self.read(session, probe));
        join_all(reads).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_accessors() {
        assert_eq!(Signal::text("connected").as_str(), Some("connected"));
        assert_eq!(Signal::number(42.0).as_f64(), Some(42.0));
        assert_eq!(Signal::text("connected").as_f64(), None);

        let stats = Signal::from(serde_json::json!({"inbound": {"bytesReceived": 1024}}));
        assert_eq!(
            stats.pointer("/inbound/bytesReceived").and_then(|v| v.as_f64()),
            Some(1024.0)
        );
    }

    #[test]
    fn signal_serializes_untagged() {
        let value = serde_json::to_value(Signal::text("connected")).unwrap();
        assert_eq!(value, serde_json::json!("connected"));

        let back: Signal = serde_json::from_value(serde_json::json!(8.5)).unwrap();
        assert_eq!(back, Signal::Number(8.5));
    }

    #[test]
    fn sample_keeps_slot_order() {
        let sample = Sample::new(100, vec![Signal::text("a"), Signal::text("b")]);
        assert_eq!(sample.signals[0].as_str(), Some("a"));
        assert_eq!(sample.signals[1].as_str(), Some("b"));
    }
}
