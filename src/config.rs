//! Test matrix configuration types
//!
//! These types are supplied fully formed by the embedding application.
//! They derive serde so hosts can deserialize them from whatever format
//! they keep test definitions in, but no file loading lives here.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// One candidate client configuration for a role.
///
/// The engine treats `params` as opaque; only the `SessionProvider` that
/// acquires sessions from it interprets the contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Display name, also used to label tuples in logs and results
    pub name: String,

    /// Provider-specific parameters
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Attach a provider parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// A participant role and its ordered candidate configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Role name, e.g. "caller" or "callee"
    pub role: String,

    /// Candidate configurations to try in this role
    pub candidates: Vec<SessionConfig>,
}

impl RoleSpec {
    pub fn new(role: impl Into<String>, candidates: Vec<SessionConfig>) -> Self {
        Self {
            role: role.into(),
            candidates,
        }
    }
}

/// Execution parameters for one matrix run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Test name, used in logs and the aggregated result
    pub name: String,

    /// Number of participants per tuple; must match the role count
    pub participants: usize,

    /// How many tuples may execute concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Budget for one tuple, acquisition through release
    #[serde(default = "default_tuple_budget")]
    pub tuple_budget_ms: u64,

    /// Budget for the whole matrix; elapsing it cancels in-flight tuples
    #[serde(default = "default_global_budget")]
    pub global_budget_ms: u64,
}

fn default_concurrency() -> usize {
    4
}
fn default_tuple_budget() -> u64 {
    60_000
}
fn default_global_budget() -> u64 {
    300_000
}

impl TestDefinition {
    /// Build a definition with default concurrency and budgets
    pub fn new(name: impl Into<String>, participants: usize) -> Self {
        Self {
            name: name.into(),
            participants,
            concurrency: default_concurrency(),
            tuple_budget_ms: default_tuple_budget(),
            global_budget_ms: default_global_budget(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_tuple_budget(mut self, budget: Duration) -> Self {
        self.tuple_budget_ms = budget.as_millis() as u64;
        self
    }

    pub fn with_global_budget(mut self, budget: Duration) -> Self {
        self.global_budget_ms = budget.as_millis() as u64;
        self
    }

    pub fn tuple_budget(&self) -> Duration {
        Duration::from_millis(self.tuple_budget_ms)
    }

    pub fn global_budget(&self) -> Duration {
        Duration::from_millis(self.global_budget_ms)
    }

    /// Reject definitions that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("test name must not be empty"));
        }
        if self.participants == 0 {
            return Err(Error::config("participant count must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }
        if self.tuple_budget_ms == 0 {
            return Err(Error::config("tuple budget must be positive"));
        }
        if self.global_budget_ms == 0 {
            return Err(Error::config("global budget must be positive"));
        }
        Ok(())
    }
}
