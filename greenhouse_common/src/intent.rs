//! Upstream control intent and response wire shapes.
//!
//! These mirror the JSON shapes exactly; any transport (HTTP, an LLM tool
//! surface, a CLI) can serialize/deserialize these directly.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A caller-specified target for a [`ControlIntent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Target {
    /// Move to an absolute percent opening, 0-100.
    Percent { value: u8 },
    /// Run for an explicit number of seconds (actuators with no physical
    /// travel limit, e.g. irrigation).
    Seconds { value: f64 },
    /// Drive to a fully on or fully off binary state.
    Binary { value: bool },
}

/// A command submitted by an upstream caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlIntent {
    pub actuator_id: String,
    pub target: Target,
    /// Priority level, 1 (emergency) through 4 (automatic). L5
    /// (fallback-autonomous) is never submitted by this interface — it is
    /// the far side's own behaviour when the bridge stops sending.
    pub level: u8,
    /// Caller tag, carried through to logs and the persisted job record.
    pub origin: String,
}

/// Disposition of a submitted [`ControlIntent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Accepted,
    Queued,
    Locked,
    Rejected,
}

/// Response returned for a submitted [`ControlIntent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResponse {
    pub disposition: Disposition,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_sec: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl IntentResponse {
    /// A bare accepted response, no ETA or job id.
    pub fn accepted() -> Self {
        Self {
            disposition: Disposition::Accepted,
            eta_sec: None,
            reason: None,
            job_id: None,
        }
    }

    /// An accepted response carrying the dispatched job's id.
    pub fn accepted_with_job(job_id: impl Into<String>) -> Self {
        Self {
            disposition: Disposition::Accepted,
            eta_sec: None,
            reason: None,
            job_id: Some(job_id.into()),
        }
    }

    /// A queued response.
    pub fn queued() -> Self {
        Self {
            disposition: Disposition::Queued,
            eta_sec: None,
            reason: None,
            job_id: None,
        }
    }

    /// Build the caller-facing response from a [`CoreError`].
    pub fn from_error(err: &CoreError) -> Self {
        let disposition = match err {
            CoreError::Locked { .. } => Disposition::Locked,
            _ => Disposition::Rejected,
        };
        Self {
            disposition,
            eta_sec: err.eta_sec(),
            reason: Some(err.reason_tag().to_string()),
            job_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_roundtrips_percent_target() {
        let intent = ControlIntent {
            actuator_id: "VenSdWin".to_string(),
            target: Target::Percent { value: 30 },
            level: 3,
            origin: "automation".to_string(),
        };
        let json = serde_json::to_string(&intent).unwrap();
        let back: ControlIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(intent, back);
    }

    #[test]
    fn locked_error_maps_to_locked_disposition() {
        let resp = IntentResponse::from_error(&CoreError::Locked { eta_sec: 12 });
        assert_eq!(resp.disposition, Disposition::Locked);
        assert_eq!(resp.eta_sec, Some(12));
        assert_eq!(resp.reason.as_deref(), Some("LOCKED"));
    }

    #[test]
    fn cooling_error_maps_to_rejected_disposition() {
        let resp = IntentResponse::from_error(&CoreError::Cooling { eta_sec: 1 });
        assert_eq!(resp.disposition, Disposition::Rejected);
        assert_eq!(resp.reason.as_deref(), Some("COOLING"));
    }

    #[test]
    fn response_omits_absent_fields_when_serialized() {
        let resp = IntentResponse::accepted();
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("eta_sec").is_none());
        assert!(json.get("reason").is_none());
        assert!(json.get("job_id").is_none());
    }
}
