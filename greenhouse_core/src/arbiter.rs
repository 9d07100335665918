//! PriorityArbiter (C5, spec.md §4.5): a pure function of
//! `(actuator_state, incoming_level, same_actuator)` that decides whether
//! an incoming command is accepted, preempts the current motion, waits, is
//! locked out, or is rejected.
//!
//! Grounded on `evo_control_unit::command::source_lock`'s
//! `try_acquire`/`check_authority` pure-function style (no side effects,
//! caller applies the result) and on `evo_control_unit::command::arbitration`'s
//! split between "what is this command" and "is it allowed right now."

use greenhouse_common::error::CoreError;
use greenhouse_common::state::{ActuatorState, Phase};

/// What the caller should do with an incoming command once arbitrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No motion is in progress; dispatch immediately.
    Accept,
    /// A lower-or-equal-priority motion is in progress; cancel it and
    /// dispatch the new job (after any required cooling wait).
    Preempt,
    /// A higher-priority motion is in progress; enqueue for later.
    Wait,
}

fn eta_sec(deadline: Option<f64>, now: f64) -> u64 {
    deadline
        .map(|d| (d - now).max(0.0).round() as u64)
        .unwrap_or(0)
}

/// Arbitrate an incoming command against the current state of the
/// actuator it targets.
///
/// `same_actuator` is always `true` for the only case this function is
/// ever meaningfully invoked for — commands targeting *different*
/// actuators are never arbitrated against each other (spec.md §5: "not
/// ordered with respect to each other"); the parameter is kept to mirror
/// the exact signature spec.md §4.5 describes and trivially accepts when
/// `false`.
pub fn arbitrate(
    state: &ActuatorState,
    incoming_level: u8,
    same_actuator: bool,
    now: f64,
) -> Result<Disposition, CoreError> {
    if !same_actuator {
        return Ok(Disposition::Accept);
    }

    match state.phase {
        Phase::Idle => Ok(Disposition::Accept),

        Phase::Moving => {
            let current = state.current_level.unwrap_or(4);
            match (current, incoming_level) {
                // L1 in motion: L1 always preempts itself (never waits),
                // anything else must wait for the emergency motion to finish.
                (1, 1) => Ok(Disposition::Preempt),
                (1, _) => Ok(Disposition::Wait),

                // MOVING @ L2
                (2, 1) | (2, 2) => Ok(Disposition::Preempt),
                (2, 3) | (2, 4) => Ok(Disposition::Wait),

                // MOVING @ L3 — same-actuator L3-over-L3 is an operator
                // override (PREEMPT), not a LOCK.
                (3, 1) | (3, 2) | (3, 3) => Ok(Disposition::Preempt),
                (3, 4) => Ok(Disposition::Wait),

                // MOVING @ L4
                (4, 1) | (4, 2) | (4, 3) => Ok(Disposition::Preempt),
                (4, 4) => Err(CoreError::Locked {
                    eta_sec: eta_sec(state.motion_ends_at, now),
                }),

                _ => Ok(Disposition::Wait),
            }
        }

        Phase::Cooling => match incoming_level {
            1 | 2 => Ok(Disposition::Preempt),
            _ => Err(CoreError::Cooling {
                eta_sec: eta_sec(state.cooling_ends_at, now),
            }),
        },

        Phase::Calibrating => match incoming_level {
            1 => Ok(Disposition::Preempt),
            // Calibration is itself L2-priority (spec.md §4.5 footnote): an
            // equal-or-higher safety command interrupts it. There is no
            // separate "ACCEPT-while-calibrating" transition in the FSM
            // table (spec.md §4.4), so this is implemented identically to
            // PREEMPT — cancel calibration, start the new job — and only
            // differs from the L1 row in being phrased as ACCEPT in the
            // arbiter table because, from the caller's perspective, no
            // prior *caller* motion is being displaced (see DESIGN.md).
            2 => Ok(Disposition::Preempt),
            _ => Err(CoreError::Calibrating {
                eta_sec: eta_sec(state.motion_ends_at, now),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenhouse_common::state::Direction;

    fn moving_at(level: u8, ends_at: f64) -> ActuatorState {
        ActuatorState {
            position_pct: 10,
            phase: Phase::Moving,
            last_direction: Direction::Open,
            motion_started_at: Some(0.0),
            motion_ends_at: Some(ends_at),
            cooling_ends_at: None,
            current_level: Some(level),
            last_calibrated_at: None,
        }
    }

    #[test]
    fn idle_always_accepts() {
        let state = ActuatorState::fresh();
        for level in 1..=4 {
            assert_eq!(
                arbitrate(&state, level, true, 0.0).unwrap(),
                Disposition::Accept
            );
        }
    }

    #[test]
    fn different_actuator_always_accepts() {
        let state = moving_at(4, 100.0);
        assert_eq!(
            arbitrate(&state, 4, false, 0.0).unwrap(),
            Disposition::Accept
        );
    }

    #[test]
    fn moving_l4_same_level_locks_with_eta() {
        let state = moving_at(4, 30.0);
        let err = arbitrate(&state, 4, true, 12.0).unwrap_err();
        assert_eq!(err, CoreError::Locked { eta_sec: 18 });
    }

    #[test]
    fn moving_l3_same_level_is_preempt_not_lock() {
        let state = moving_at(3, 30.0);
        assert_eq!(
            arbitrate(&state, 3, true, 12.0).unwrap(),
            Disposition::Preempt
        );
    }

    #[test]
    fn moving_l2_l3_and_l4_wait() {
        let state = moving_at(2, 30.0);
        assert_eq!(arbitrate(&state, 3, true, 0.0).unwrap(), Disposition::Wait);
        assert_eq!(arbitrate(&state, 4, true, 0.0).unwrap(), Disposition::Wait);
    }

    #[test]
    fn l1_always_preempts_even_itself() {
        for level in [2u8, 3, 4] {
            let state = moving_at(level, 30.0);
            assert_eq!(
                arbitrate(&state, 1, true, 0.0).unwrap(),
                Disposition::Preempt
            );
        }
        let state = moving_at(1, 30.0);
        assert_eq!(
            arbitrate(&state, 1, true, 0.0).unwrap(),
            Disposition::Preempt
        );
    }

    #[test]
    fn cooling_rejects_l3_and_l4_with_eta() {
        let mut state = ActuatorState::fresh();
        state.phase = Phase::Cooling;
        state.cooling_ends_at = Some(13.0);

        let err = arbitrate(&state, 3, true, 12.0).unwrap_err();
        assert_eq!(err, CoreError::Cooling { eta_sec: 1 });

        let err = arbitrate(&state, 4, true, 12.0).unwrap_err();
        assert_eq!(err, CoreError::Cooling { eta_sec: 1 });
    }

    #[test]
    fn cooling_preempts_for_l1_and_l2() {
        let mut state = ActuatorState::fresh();
        state.phase = Phase::Cooling;
        state.cooling_ends_at = Some(13.0);

        assert_eq!(
            arbitrate(&state, 1, true, 0.0).unwrap(),
            Disposition::Preempt
        );
        assert_eq!(
            arbitrate(&state, 2, true, 0.0).unwrap(),
            Disposition::Preempt
        );
    }

    #[test]
    fn calibrating_rejects_l3_and_l4() {
        let mut state = ActuatorState::fresh();
        state.phase = Phase::Calibrating;
        state.motion_ends_at = Some(54.0);

        let err = arbitrate(&state, 3, true, 0.0).unwrap_err();
        assert_eq!(err, CoreError::Calibrating { eta_sec: 54 });
        let err = arbitrate(&state, 4, true, 0.0).unwrap_err();
        assert_eq!(err, CoreError::Calibrating { eta_sec: 54 });
    }

    #[test]
    fn calibrating_preempts_for_l1_and_l2() {
        let mut state = ActuatorState::fresh();
        state.phase = Phase::Calibrating;
        state.motion_ends_at = Some(54.0);

        assert_eq!(
            arbitrate(&state, 1, true, 0.0).unwrap(),
            Disposition::Preempt
        );
        assert_eq!(
            arbitrate(&state, 2, true, 0.0).unwrap(),
            Disposition::Preempt
        );
    }
}
