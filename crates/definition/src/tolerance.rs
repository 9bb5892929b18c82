// SPDX-License-Identifier: MIT

//! Per-definition policy for handling step failures.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How the orchestrator reacts when a step (or its children) fail.
///
/// Serialized as `"strict"`, `"continue_on_error"`, or `"percent:N"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorTolerance {
    /// First failed step aborts the remaining chain.
    #[default]
    Strict,
    /// Failures are logged; the chain continues.
    ContinueOnError,
    /// Abort when more than N percent of a step's children failed.
    Percent(u8),
}

impl ErrorTolerance {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "strict" => Ok(ErrorTolerance::Strict),
            "continue_on_error" => Ok(ErrorTolerance::ContinueOnError),
            other => {
                let n = other
                    .strip_prefix("percent:")
                    .ok_or_else(|| format!("unknown error_tolerance: {other:?}"))?;
                let n: u8 = n
                    .parse()
                    .map_err(|_| format!("invalid percent in error_tolerance: {other:?}"))?;
                if n > 100 {
                    return Err(format!("error_tolerance percent out of range: {n}"));
                }
                Ok(ErrorTolerance::Percent(n))
            }
        }
    }

    /// Whether a step with the given child failure ratio breaches the policy.
    pub fn breached(&self, failed: u64, total: u64) -> bool {
        match self {
            ErrorTolerance::Strict => failed > 0,
            ErrorTolerance::ContinueOnError => false,
            ErrorTolerance::Percent(n) => {
                failed as f64 * 100.0 / total.max(1) as f64 > f64::from(*n)
            }
        }
    }
}

impl std::fmt::Display for ErrorTolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorTolerance::Strict => f.write_str("strict"),
            ErrorTolerance::ContinueOnError => f.write_str("continue_on_error"),
            ErrorTolerance::Percent(n) => write!(f, "percent:{n}"),
        }
    }
}

impl Serialize for ErrorTolerance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ErrorTolerance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ErrorTolerance::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
#[path = "tolerance_tests.rs"]
mod tests;
