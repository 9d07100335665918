//! The mutable, persisted state of a single actuator.
//!
//! Created on first observation of an actuator id, mutated only by the FSM
//! holding that actuator's lock, and persisted after every phase transition.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    /// Not moving, not cooling, not calibrating.
    Idle,
    /// Motor energised toward a target.
    Moving,
    /// Idle interval enforced after motion to protect the motor.
    Cooling,
    /// Driving to a mechanical limit to reset the position estimate.
    Calibrating,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Idle
    }
}

/// Direction of the most recent (or in-flight) motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Open,
    Close,
    None,
}

impl Default for Direction {
    fn default() -> Self {
        Self::None
    }
}

impl Direction {
    /// Suffix appended to an actuator id to address the relay that drives
    /// this direction on the wire. Empty for `None` (nothing to energise).
    pub fn wire_suffix(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Close => "Close",
            Self::None => "",
        }
    }
}

/// Per-actuator mutable, persisted state.
///
/// Invariant 1: `0 <= position_pct <= 100` at all times, including after
/// preemption. Invariant 6: position estimates are monotone during a single
/// motion and never cross 0 or 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorState {
    /// Estimated opening, 0-100. For on/off actuators, 0 or 100 only.
    pub position_pct: u8,

    /// Current lifecycle phase.
    pub phase: Phase,

    /// Direction of the last (or current) motion.
    pub last_direction: Direction,

    /// Monotonic instant the current motion started, as seconds since an
    /// arbitrary epoch private to the process. Meaningless once read back
    /// by a different process than the one that wrote it — see
    /// [`ActuatorState::resume_after_restart`].
    #[serde(default)]
    pub motion_started_at: Option<f64>,

    /// Monotonic instant the current motion is expected to end.
    #[serde(default)]
    pub motion_ends_at: Option<f64>,

    /// Monotonic instant the current cooling window ends.
    #[serde(default)]
    pub cooling_ends_at: Option<f64>,

    /// Priority level (1-5) of the in-flight command; valid only when
    /// `phase != Idle`.
    #[serde(default)]
    pub current_level: Option<u8>,

    /// Wall-clock timestamp (seconds since Unix epoch) of the last
    /// completed calibration.
    #[serde(default)]
    pub last_calibrated_at: Option<i64>,
}

impl ActuatorState {
    /// A freshly-observed actuator with no prior history: idle at 0%.
    pub fn fresh() -> Self {
        Self {
            position_pct: 0,
            phase: Phase::Idle,
            last_direction: Direction::None,
            motion_started_at: None,
            motion_ends_at: None,
            cooling_ends_at: None,
            current_level: None,
            last_calibrated_at: None,
        }
    }

    /// Clamp `position_pct` into the valid 0-100 range (Invariant 1).
    pub fn clamp_position(value: f64) -> u8 {
        value.round().clamp(0.0, 100.0) as u8
    }

    /// Normalize a state just restored from the [`StateStore`](crate) for
    /// use in a fresh process. No timer ever survives a restart — the
    /// Scheduler's monotonic clock epoch resets every time the process
    /// starts, so a persisted `MOVING`/`COOLING`/`CALIBRATING` phase
    /// describes motion nothing is actually driving any more (Invariant 2:
    /// a `MOVING` actuator has exactly one outstanding timer). Such an
    /// actuator is folded back to `IDLE` unconditionally, on both clean and
    /// unclean restarts, so it is eligible for the startup calibration pass
    /// that re-establishes a trustworthy position (spec.md §4.2/§5).
    pub fn resume_after_restart(mut self) -> Self {
        if self.phase != Phase::Idle {
            self.phase = Phase::Idle;
            self.motion_started_at = None;
            self.motion_ends_at = None;
            self.cooling_ends_at = None;
            self.current_level = None;
        }
        self
    }
}

impl Default for ActuatorState {
    fn default() -> Self {
        Self::fresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_idle_at_zero() {
        let s = ActuatorState::fresh();
        assert_eq!(s.position_pct, 0);
        assert_eq!(s.phase, Phase::Idle);
        assert_eq!(s.last_direction, Direction::None);
    }

    #[test]
    fn clamp_position_bounds_to_0_100() {
        assert_eq!(ActuatorState::clamp_position(-5.0), 0);
        assert_eq!(ActuatorState::clamp_position(150.0), 100);
        assert_eq!(ActuatorState::clamp_position(42.4), 42);
    }

    #[test]
    fn wire_suffix_is_empty_only_for_none() {
        assert_eq!(Direction::Open.wire_suffix(), "Open");
        assert_eq!(Direction::Close.wire_suffix(), "Close");
        assert_eq!(Direction::None.wire_suffix(), "");
    }

    #[test]
    fn resume_after_restart_folds_non_idle_phases_back_to_idle() {
        let mut s = ActuatorState::fresh();
        s.position_pct = 45;
        s.phase = Phase::Moving;
        s.last_direction = Direction::Open;
        s.motion_started_at = Some(100.0);
        s.motion_ends_at = Some(130.0);
        s.current_level = Some(3);

        let resumed = s.resume_after_restart();
        assert_eq!(resumed.phase, Phase::Idle);
        assert_eq!(resumed.position_pct, 45, "position estimate itself is preserved");
        assert!(resumed.motion_started_at.is_none());
        assert!(resumed.motion_ends_at.is_none());
        assert!(resumed.current_level.is_none());
    }

    #[test]
    fn resume_after_restart_is_a_no_op_for_idle_state() {
        let s = ActuatorState::fresh();
        assert_eq!(s.clone().resume_after_restart(), s);
    }

    #[test]
    fn serializes_to_expected_json_shape() {
        let mut s = ActuatorState::fresh();
        s.position_pct = 30;
        s.phase = Phase::Cooling;
        s.last_direction = Direction::Open;
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["position_pct"], 30);
        assert_eq!(json["phase"], "COOLING");
        assert_eq!(json["last_direction"], "OPEN");
    }
}
