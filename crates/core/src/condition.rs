use std::fmt;
use std::time::Duration;

use kwait_path::FieldPath;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{ConfigError, Timeout};

/// `fieldValidation` directive sent with server-side apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValidation {
    #[default]
    Strict,
    Warn,
    Ignore,
}

impl FieldValidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldValidation::Strict => "Strict",
            FieldValidation::Warn => "Warn",
            FieldValidation::Ignore => "Ignore",
        }
    }
}

/// How a server-side apply is issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOptions {
    pub field_manager: String,
    pub force_conflicts: bool,
    #[serde(default)]
    pub field_validation: FieldValidation,
}

impl ApplyOptions {
    pub fn new(field_manager: impl Into<String>) -> Self {
        Self { field_manager: field_manager.into(), force_conflicts: false, field_validation: FieldValidation::Strict }
    }

    pub fn force(mut self, on: bool) -> Self {
        self.force_conflicts = on;
        self
    }
}

/// A single condition evaluated against the live object after apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitCondition {
    path: FieldPath,
    pub expected_value: Option<String>,
    pub timeout: Timeout,
    pub poll_interval: Duration,
}

impl WaitCondition {
    /// Parses `json_path` eagerly so malformed paths fail at configuration time.
    pub fn new(json_path: &str, expected_value: Option<&str>) -> Result<Self, ConfigError> {
        let path = FieldPath::parse(json_path)
            .map_err(|source| ConfigError::Path { path: json_path.to_string(), source })?;
        Ok(Self {
            path,
            expected_value: expected_value.map(str::to_string),
            timeout: Timeout::default(),
            poll_interval: Duration::from_secs(5),
        })
    }

    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every;
        self
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// Holds when the path resolves and either equals the expected value,
    /// or (with no expected value) renders to something non-empty.
    pub fn is_satisfied_by(&self, live: &Json) -> bool {
        match (self.path.lookup(live), self.expected_value.as_deref()) {
            (Some(found), Some(expected)) => found == expected,
            (Some(found), None) => !found.is_empty(),
            (None, _) => false,
        }
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expected_value {
            Some(v) => write!(f, "{}={}", self.path, v),
            None => write!(f, "{}", self.path),
        }
    }
}

/// Wait for an object to disappear after delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteWait {
    pub timeout: Timeout,
    pub poll_interval: Duration,
}

impl Default for DeleteWait {
    fn default() -> Self {
        Self { timeout: Timeout::default(), poll_interval: Duration::from_secs(5) }
    }
}
