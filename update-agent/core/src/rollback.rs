//! Rollback bookkeeping shared between the lifecycle manager and the crash
//! guard.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel `toVersion` recorded when a rollback abandons OTA bundles
/// entirely and the host falls back to its built-in code.
pub const ORIGINAL_BUNDLE: &str = "original";

/// Why a bundle was rolled back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RollbackReason {
    /// The crash guard observed a fault while the bundle was pending
    /// validation.
    CrashDetected,
    /// The host asked for the previous bundle back.
    Manual,
    /// The retry budget was exhausted and the agent reset to built-in code.
    MaxRollbacksExceeded,
    /// A host-supplied label, set through `mark_current_bundle_as_bad`.
    Other(String),
}

impl RollbackReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CrashDetected => "crash_detected",
            Self::Manual => "manual",
            Self::MaxRollbacksExceeded => "max_rollbacks_exceeded",
            Self::Other(label) => label,
        }
    }
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the append-only rollback history.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRecord {
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    pub from_version: String,
    pub to_version: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_with_wire_field_names() {
        let record = RollbackRecord {
            timestamp: 1_700_000_000_000,
            from_version: "1.1.0".into(),
            to_version: ORIGINAL_BUNDLE.into(),
            reason: RollbackReason::MaxRollbacksExceeded.to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fromVersion"], "1.1.0");
        assert_eq!(json["toVersion"], "original");
        assert_eq!(json["reason"], "max_rollbacks_exceeded");
        let back: RollbackRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
