//! Ephemeral motion jobs (C4/C5 input, never persisted).
//!
//! A [`MotionJob`] is produced once per accepted/queued [`ControlIntent`]
//! and consumed by the [`crate::fsm::ActuatorFsm`] it targets; unlike
//! [`greenhouse_common::state::ActuatorState`] it does not survive a
//! restart (spec.md §3, "MotionJob (ephemeral)").

use std::sync::atomic::{AtomicU64, Ordering};

use greenhouse_common::intent::{ControlIntent, Target};

/// A single accepted-or-queued motion request for one actuator.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionJob {
    pub job_id: String,
    pub actuator_id: String,
    pub target: Target,
    /// Priority level, 1 (emergency) through 4 (automatic).
    pub level: u8,
    /// Caller tag, carried through to logs.
    pub origin: String,
}

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

impl MotionJob {
    /// Build a job from a submitted intent, minting a fresh job id.
    pub fn from_intent(intent: &ControlIntent) -> Self {
        let seq = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            job_id: format!("{}-{seq:x}", intent.actuator_id),
            actuator_id: intent.actuator_id.clone(),
            target: intent.target.clone(),
            level: intent.level,
            origin: intent.origin.clone(),
        }
    }
}
