// SPDX-License-Identifier: MIT

//! Job definition model: one TOML document per user-authored workflow.

use crate::cron::CronExpr;
use crate::duration::parse_duration;
use crate::tolerance::ErrorTolerance;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("definition parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid definition {id:?}: {message}")]
    Invalid { id: String, message: String },

    #[error("duplicate definition id {0:?}")]
    Duplicate(String),

    #[error("definition directory {0}: {1}")]
    Io(PathBuf, std::io::Error),
}

/// One step of a definition; `type` selects the manager that expands it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(rename = "type")]
    pub action: String,
    /// Must name an earlier step. The dependent step waits for that step's
    /// parent job to finish before it is scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    /// Opaque config, validated by the manager for `action`.
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
}

/// A user-authored workflow loaded from a TOML file.
///
/// Unknown root fields are accepted silently, which covers the deprecated
/// `type` / `job_type` / `source_type` fields older documents still carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Five-field cron expression; absent means manual runs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// End-to-end deadline per parent job, e.g. "30m".
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub error_tolerance: ErrorTolerance,
    /// Global variables merged under every step's config (step keys win).
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    pub steps: Vec<Step>,
}

fn default_timeout() -> String {
    "30m".to_string()
}

fn default_true() -> bool {
    true
}

impl JobDefinition {
    pub fn from_toml(text: &str) -> Result<Self, DefinitionError> {
        let def: JobDefinition = toml::from_str(text)?;
        def.validate()?;
        Ok(def)
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        let invalid = |message: String| DefinitionError::Invalid { id: self.id.clone(), message };

        if self.id.is_empty() {
            return Err(invalid("missing id".into()));
        }
        if self.name.is_empty() {
            return Err(invalid("missing name".into()));
        }
        if self.steps.is_empty() {
            return Err(invalid("at least one [[steps]] block is required".into()));
        }

        let mut seen = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if step.name.is_empty() {
                return Err(invalid("step missing name".into()));
            }
            if step.action.is_empty() {
                return Err(invalid(format!("step {:?} missing type", step.name)));
            }
            if seen.contains(&step.name.as_str()) {
                return Err(invalid(format!("duplicate step name {:?}", step.name)));
            }
            if let Some(dep) = &step.depends_on {
                if !seen.contains(&dep.as_str()) {
                    return Err(invalid(format!(
                        "step {:?} depends_on {:?} which is not an earlier step",
                        step.name, dep
                    )));
                }
            }
            seen.push(step.name.as_str());
        }

        parse_duration(&self.timeout).map_err(|e| invalid(format!("bad timeout: {e}")))?;
        if let Some(schedule) = &self.schedule {
            CronExpr::parse(schedule).map_err(|e| invalid(format!("bad schedule: {e}")))?;
        }
        Ok(())
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// The parsed end-to-end deadline. Validation guarantees this parses.
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(30 * 60))
    }

    pub fn cron(&self) -> Option<CronExpr> {
        self.schedule.as_deref().and_then(|s| CronExpr::parse(s).ok())
    }

    /// A step's effective config: global variables overlaid by step keys.
    pub fn step_config(&self, step: &Step) -> serde_json::Map<String, Value> {
        let mut merged = serde_json::Map::new();
        for (k, v) in &self.variables {
            merged.insert(k.clone(), v.clone());
        }
        for (k, v) in &step.config {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

#[cfg(test)]
#[path = "def_tests.rs"]
mod tests;
