//! SafetyGuard (C8, spec.md §4.8): absolute bounds evaluated after
//! arbitration and before dispatch.
//!
//! Implemented as a pure evaluation pass over pre-computed inputs with no
//! hidden state, grounded on the teacher's
//! `evo_control_unit::error::propagation::evaluate_errors` style — called
//! once per accepted job, no side effects of its own.

use greenhouse_common::error::CoreError;
use greenhouse_common::registry::ActuatorDescriptor;

/// Clamp a computed motion duration to the actuator's absolute bounds and
/// reject anything that bypasses them.
///
/// - Irrigation-class actuators (`has_limit = false`) are capped at
///   `max_duration_sec`, for every level including L1 (spec.md Invariant 4,
///   "every MOVING period is bounded by `max_duration_sec` regardless of
///   requested target or level").
/// - Travel actuators (`has_limit = true`) are capped at
///   `max_continuous_sec`; the watchdog (C7) also force-stops a motion that
///   overruns this in flight, this check additionally prevents *starting*
///   one that would already be guaranteed to overrun.
///
/// Returns the (possibly clamped) duration to actually run.
pub fn clamp_duration(descriptor: &ActuatorDescriptor, requested_duration_sec: f64) -> f64 {
    if !descriptor.has_limit {
        let cap = descriptor
            .max_duration_sec
            .expect("registry validation guarantees max_duration_sec for has_limit=false");
        requested_duration_sec.min(cap)
    } else {
        requested_duration_sec.min(descriptor.max_continuous_sec())
    }
}

/// Rain interlock (spec.md §4.8): while active, any L4 OPEN job on a
/// roof-window actuator is downgraded to REJECT, regardless of what
/// arbitration decided.
///
/// `is_roof_window` and `is_open_direction` are supplied by the caller,
/// which knows the descriptor id/naming convention and the computed
/// motion direction; this function stays a pure predicate with no
/// knowledge of naming schemes.
pub fn rain_interlock_rejects(
    rain_active: bool,
    level: u8,
    is_roof_window: bool,
    is_open_direction: bool,
) -> Option<CoreError> {
    if rain_active && level == 4 && is_roof_window && is_open_direction {
        // spec.md's error table has no row of its own for the rain
        // interlock; it is reported with the same machine-readable shape
        // as any other out-of-bounds target (see DESIGN.md).
        Some(CoreError::OutOfRange(
            "rain interlock active: L4 OPEN rejected for roof window".to_string(),
        ))
    } else {
        None
    }
}
