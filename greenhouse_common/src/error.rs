//! Runtime error kinds for the greenhouse actuator control core.
//!
//! Startup-fatal configuration errors live in [`crate::config::ConfigError`];
//! this module covers errors that occur once the scheduler is running and
//! must never abort the process (see the error table in the component
//! design — runtime errors are always reported to the caller or logged,
//! never fatal).

use thiserror::Error;

/// Errors surfaced while arbitrating or dispatching a single command.
///
/// Each variant carries the fields needed to reconstruct the caller-facing
/// `IntentResponse` (`eta_sec`, `reason`).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    /// The actuator id is not present in the registry.
    #[error("unknown actuator: {0}")]
    UnknownActuator(String),

    /// The requested target is outside the actuator's valid range.
    #[error("target out of range: {0}")]
    OutOfRange(String),

    /// The actuator is locked by a higher-or-equal priority motion.
    #[error("actuator locked, eta {eta_sec}s")]
    Locked {
        /// Seconds until the blocking motion ends.
        eta_sec: u64,
    },

    /// The actuator is in its cooling window.
    #[error("actuator cooling, eta {eta_sec}s")]
    Cooling {
        /// Seconds until cooling ends.
        eta_sec: u64,
    },

    /// The actuator is calibrating and cannot accept this level.
    #[error("actuator calibrating, eta {eta_sec}s")]
    Calibrating {
        /// Seconds until calibration is expected to finish.
        eta_sec: u64,
    },

    /// A queued command's TTL elapsed before it could be dispatched.
    #[error("queued command expired")]
    QueuedExpired,

    /// The max-continuous watchdog forced the actuator off.
    #[error("motion overran max_continuous_sec and was force-stopped")]
    Overrun,

    /// A bus send failed at the I/O layer.
    #[error("bus I/O error: {0}")]
    BusIo(String),

    /// Persisting state to the store failed.
    #[error("state persistence I/O error: {0}")]
    PersistIo(String),
}

impl CoreError {
    /// The ETA in seconds this error carries, if any — used to populate the
    /// `eta_sec` field of the caller-facing response.
    pub fn eta_sec(&self) -> Option<u64> {
        match self {
            Self::Locked { eta_sec } | Self::Cooling { eta_sec } | Self::Calibrating { eta_sec } => {
                Some(*eta_sec)
            }
            _ => None,
        }
    }

    /// The short machine-readable reason tag matching the error table.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            Self::UnknownActuator(_) => "UNKNOWN_ACTUATOR",
            Self::OutOfRange(_) => "OUT_OF_RANGE",
            Self::Locked { .. } => "LOCKED",
            Self::Cooling { .. } => "COOLING",
            Self::Calibrating { .. } => "CALIBRATING",
            Self::QueuedExpired => "QUEUED_EXPIRED",
            Self::Overrun => "OVERRUN",
            Self::BusIo(_) => "BUS_IO",
            Self::PersistIo(_) => "PERSIST_IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_sec_present_only_for_timed_variants() {
        assert_eq!(CoreError::Locked { eta_sec: 5 }.eta_sec(), Some(5));
        assert_eq!(CoreError::Cooling { eta_sec: 3 }.eta_sec(), Some(3));
        assert_eq!(CoreError::Calibrating { eta_sec: 54 }.eta_sec(), Some(54));
        assert_eq!(CoreError::QueuedExpired.eta_sec(), None);
        assert_eq!(CoreError::Overrun.eta_sec(), None);
    }

    #[test]
    fn reason_tags_match_error_table() {
        assert_eq!(
            CoreError::UnknownActuator("x".into()).reason_tag(),
            "UNKNOWN_ACTUATOR"
        );
        assert_eq!(CoreError::Cooling { eta_sec: 1 }.reason_tag(), "COOLING");
        assert_eq!(
            CoreError::Calibrating { eta_sec: 1 }.reason_tag(),
            "CALIBRATING"
        );
    }
}
