//! Configuration consumed by the lifecycle orchestrator.
//!
//! `ProviderConfig` carries the provider-wide defaults and is passed by
//! reference to every orchestrator. `LifecycleConfig` is the per-resource
//! surface (`force_conflicts`, `field_manager`, `wait_for_upsert`,
//! `wait_for_delete`), deserializable from the same snake_case keys.

use serde::{Deserialize, Serialize};

use crate::timing::{parse_poll_interval, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use crate::{ApplyOptions, ConfigError, DeleteWait, FieldValidation, Timeout, WaitCondition};

pub const DEFAULT_FIELD_MANAGER: &str = "kwait";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub field_manager: String,
    pub force_conflicts: bool,
    pub field_validation: FieldValidation,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            force_conflicts: false,
            field_validation: FieldValidation::Strict,
        }
    }
}

impl ProviderConfig {
    /// Defaults overridden by `KWAIT_FIELD_MANAGER` and `KWAIT_FORCE_CONFLICTS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(fm) = get("KWAIT_FIELD_MANAGER").filter(|s| !s.trim().is_empty()) {
            cfg.field_manager = fm.trim().to_string();
        }
        if let Some(raw) = get("KWAIT_FORCE_CONFLICTS") {
            cfg.force_conflicts = parse_flag(&raw)
                .ok_or(ConfigError::Env { var: "KWAIT_FORCE_CONFLICTS", value: raw.clone() })?;
        }
        Ok(cfg)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn default_timeout() -> String {
    DEFAULT_TIMEOUT.to_string()
}

fn default_poll_interval() -> String {
    DEFAULT_POLL_INTERVAL.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForUpsert {
    pub jsonpath: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

impl WaitForUpsert {
    pub fn to_condition(&self) -> Result<WaitCondition, ConfigError> {
        Ok(WaitCondition::new(&self.jsonpath, self.value.as_deref())?
            .timeout(Timeout::parse(&self.timeout)?)
            .poll_interval(parse_poll_interval(&self.poll_interval)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForDelete {
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

impl Default for WaitForDelete {
    fn default() -> Self {
        Self { timeout: default_timeout(), poll_interval: default_poll_interval() }
    }
}

impl WaitForDelete {
    pub fn to_delete_wait(&self) -> Result<DeleteWait, ConfigError> {
        Ok(DeleteWait { timeout: Timeout::parse(&self.timeout)?, poll_interval: parse_poll_interval(&self.poll_interval)? })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Falls back to the provider default when unset.
    pub force_conflicts: Option<bool>,
    /// Falls back to the provider default when unset.
    pub field_manager: Option<String>,
    pub wait_for_upsert: Vec<WaitForUpsert>,
    pub wait_for_delete: Option<WaitForDelete>,
}

impl LifecycleConfig {
    pub fn apply_options(&self, provider: &ProviderConfig) -> ApplyOptions {
        ApplyOptions {
            field_manager: self
                .field_manager
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| provider.field_manager.clone()),
            force_conflicts: self.force_conflicts.unwrap_or(provider.force_conflicts),
            field_validation: provider.field_validation,
        }
    }

    pub fn upsert_conditions(&self) -> Result<Vec<WaitCondition>, ConfigError> {
        self.wait_for_upsert.iter().map(WaitForUpsert::to_condition).collect()
    }

    pub fn delete_wait(&self) -> Result<Option<DeleteWait>, ConfigError> {
        self.wait_for_delete.as_ref().map(WaitForDelete::to_delete_wait).transpose()
    }
}
