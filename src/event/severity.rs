//! Severity normalization
//!
//! Broker payloads carry a 0-9 severity code. The collector folds that range
//! onto the six event severities. Codes outside the range are rejected rather
//! than clamped.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Normalized event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Clear,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Code -> severity, indexed by the wire code
pub const SEVERITY_MAP: [Severity; 10] = [
    Severity::Clear,
    Severity::Debug,
    Severity::Info,
    Severity::Info,
    Severity::Warning,
    Severity::Warning,
    Severity::Error,
    Severity::Error,
    Severity::Critical,
    Severity::Critical,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeverityError {
    /// Wide enough to report any JSON integer as sent
    #[error("Invalid severity code {0}: expected 0-9")]
    InvalidSeverity(i128),
}

impl Severity {
    /// Map a wire severity code to a normalized severity.
    ///
    /// Fails with [`SeverityError::InvalidSeverity`] for anything outside 0-9.
    pub fn from_code(code: i64) -> Result<Self, SeverityError> {
        usize::try_from(code)
            .ok()
            .and_then(|index| SEVERITY_MAP.get(index).copied())
            .ok_or(SeverityError::InvalidSeverity(code.into()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Clear => "clear",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i64> for Severity {
    type Error = SeverityError;

    fn try_from(code: i64) -> Result<Self, SeverityError> {
        Severity::from_code(code)
    }
}
