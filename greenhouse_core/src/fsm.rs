//! ActuatorFSM (C4, spec.md §4.4): the per-actuator state machine.
//!
//! Grounded structurally on `evo_control_unit::state::machine::MachineStateMachine`'s
//! `handle_event(Event) -> TransitionResult` shape, generalized from the
//! teacher's single global machine to one [`ActuatorFsm`] instance per
//! actuator id. Like the teacher's machine, every public method here is a
//! pure transition: it mutates `self`'s in-memory state and returns the
//! [`Effect`]s the caller (the Scheduler, §4.7) must carry out — sending a
//! bus packet, arming or cancelling a timer, persisting the new state. No
//! I/O happens inside this module; the per-actuator `tokio::sync::Mutex`
//! that guards an `ActuatorFsm` is dropped by the Scheduler before any of
//! those effects is awaited (spec.md §5).

use greenhouse_common::error::CoreError;
use greenhouse_common::intent::Target;
use greenhouse_common::registry::{ActuatorDescriptor, ActuatorKind};
use greenhouse_common::state::{ActuatorState, Direction, Phase};
use tracing::{info, warn};

use crate::arbiter::{self, Disposition};
use crate::job::MotionJob;
use crate::queue::CommandQueue;
use crate::safety;

/// A side effect the Scheduler must carry out after a transition.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Send a control packet. `actuator_type` already carries the direction
    /// suffix (see [`Direction::wire_suffix`]); the Scheduler appends the
    /// per-level source tag (`greenhouse_bus::codec::SourceTag`) and maps
    /// `level` to a send priority before handing this to a `BusAdapter`.
    Send {
        actuator_type: String,
        value: u8,
        level: u8,
    },
    /// Arm a new timer of the given kind and duration, replacing whatever
    /// timer was previously tracked for this actuator.
    ArmTimer { kind: TimerKind, duration_sec: f64 },
    /// Cancel whatever timer is currently armed for this actuator (abort
    /// the `JoinHandle`, per spec.md §5).
    CancelTimer,
    /// Persist this actuator's current `ActuatorState` to the StateStore.
    Persist,
}

/// Which timer a scheduled [`Effect::ArmTimer`] (or an `on_timer` callback)
/// refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Motion,
    Cooling,
    Calibration,
}

/// A job waiting for a reversal/cooling wait to elapse before it starts,
/// captured at the moment its preempting command displaced an in-flight
/// motion.
#[derive(Debug, Clone)]
struct PendingJob {
    job: MotionJob,
}

/// In-flight motion bookkeeping. Ephemeral like [`MotionJob`] itself (not
/// part of `ActuatorState`, never persisted) but must survive a
/// preemption so the position-freeze formula (spec.md §4.4) can be
/// evaluated against the motion that was actually interrupted.
#[derive(Debug, Clone)]
struct ActiveMotion {
    start_pct: u8,
    target_pct: u8,
    level: u8,
    planned_duration_sec: f64,
    direction: Direction,
    is_irrigation: bool,
    pending_after_wait: Option<PendingJob>,
}

/// The result of resolving a caller target against the actuator's current
/// position: how far it must move, in which direction, and for how long.
struct MotionComputation {
    direction: Direction,
    duration_sec: f64,
    target_pct: u8,
    /// Target already equals current position: nothing to do.
    no_op: bool,
    /// An irrigation-class "turn off now" request (spec.md §4.8: "L1
    /// emergency-OFF of irrigation is simply send(OFF), not a new ON") —
    /// never starts a new motion, even when it preempts one.
    stop_only: bool,
}

fn secs_to_duration_floor(value: f64) -> f64 {
    value.max(0.0)
}

/// The wait required before a preempting or queued job may start, per
/// spec.md §4.4's reversal-cooling rule: L1 never waits; a direction
/// reversal uses the longer `reversal_cooling_sec`; a same-direction
/// restart uses the shorter `cooling_sec`.
fn cooling_wait(preempting_level: u8, reversed: bool, descriptor: &ActuatorDescriptor) -> f64 {
    if preempting_level == 1 {
        0.0
    } else if reversed {
        descriptor.reversal_cooling_sec
    } else {
        descriptor.cooling_sec
    }
}

/// One actuator's complete scheduling state: its persisted
/// [`ActuatorState`], its [`CommandQueue`] of jobs waiting on it, and the
/// ephemeral bookkeeping needed to resume or freeze an in-flight motion.
pub struct ActuatorFsm {
    descriptor: ActuatorDescriptor,
    state: ActuatorState,
    queue: CommandQueue,
    active: Option<ActiveMotion>,
}

impl ActuatorFsm {
    pub fn new(
        descriptor: ActuatorDescriptor,
        state: ActuatorState,
        queue_depth: usize,
        queue_ttl_sec: f64,
    ) -> Self {
        Self {
            descriptor,
            state,
            queue: CommandQueue::new(queue_depth, queue_ttl_sec),
            active: None,
        }
    }

    pub fn descriptor(&self) -> &ActuatorDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> &ActuatorState {
        &self.state
    }

    pub fn queue_mut(&mut self) -> &mut CommandQueue {
        &mut self.queue
    }

    /// Resolve a caller [`Target`] into direction/duration/no-op against
    /// the actuator's current position, without mutating any state.
    fn compute_motion(&self, target: &Target) -> Result<MotionComputation, CoreError> {
        if !self.descriptor.has_limit {
            return match target {
                Target::Seconds { value } => {
                    if !value.is_finite() || *value <= 0.0 {
                        return Err(CoreError::OutOfRange(
                            "seconds must be positive and finite".to_string(),
                        ));
                    }
                    Ok(MotionComputation {
                        direction: Direction::None,
                        duration_sec: *value,
                        target_pct: self.state.position_pct,
                        no_op: false,
                        stop_only: false,
                    })
                }
                Target::Binary { value: false } => Ok(MotionComputation {
                    direction: Direction::None,
                    duration_sec: 0.0,
                    target_pct: self.state.position_pct,
                    no_op: self.state.phase == Phase::Idle,
                    stop_only: true,
                }),
                _ => Err(CoreError::OutOfRange(
                    "actuators with no physical limit require a seconds target (or binary off to stop)"
                        .to_string(),
                )),
            };
        }

        let target_pct = match target {
            Target::Percent { value } => *value,
            Target::Binary { value } => {
                if *value {
                    100
                } else {
                    0
                }
            }
            Target::Seconds { .. } => {
                return Err(CoreError::OutOfRange(
                    "seconds target only valid for actuators with no physical limit".to_string(),
                ));
            }
        };

        if target_pct > 100 {
            return Err(CoreError::OutOfRange(format!(
                "target {target_pct} outside 0-100"
            )));
        }
        if matches!(self.descriptor.kind, ActuatorKind::Onoff) && target_pct != 0 && target_pct != 100
        {
            return Err(CoreError::OutOfRange(
                "onoff actuators accept 0 or 100 only".to_string(),
            ));
        }

        let p = self.state.position_pct;
        if target_pct == p {
            return Ok(MotionComputation {
                direction: Direction::None,
                duration_sec: 0.0,
                target_pct,
                no_op: true,
                stop_only: false,
            });
        }

        match self.descriptor.kind {
            ActuatorKind::Onoff => {
                let direction = if target_pct > p {
                    Direction::Open
                } else {
                    Direction::Close
                };
                Ok(MotionComputation {
                    direction,
                    duration_sec: 0.0,
                    target_pct,
                    no_op: false,
                    stop_only: false,
                })
            }
            ActuatorKind::Duration => {
                if target_pct > p {
                    let dur = self.descriptor.full_open_sec * (target_pct - p) as f64 / 100.0;
                    Ok(MotionComputation {
                        direction: Direction::Open,
                        duration_sec: dur,
                        target_pct,
                        no_op: false,
                        stop_only: false,
                    })
                } else {
                    let dur = self.descriptor.full_close_sec * (p - target_pct) as f64 / 100.0;
                    Ok(MotionComputation {
                        direction: Direction::Close,
                        duration_sec: dur,
                        target_pct,
                        no_op: false,
                        stop_only: false,
                    })
                }
            }
        }
    }

    /// Submit a job for arbitration and, if accepted or preempting,
    /// dispatch. Returns the disposition actually applied (which may
    /// differ from what `arbiter::arbitrate` returned when the target
    /// turns out to be a no-op) and the effects the Scheduler must carry
    /// out.
    ///
    /// `rain_active`/`is_roof_window` let the caller apply the rain
    /// interlock (spec.md §4.8) without this module needing to know
    /// which actuators are roof windows or how rain is sensed — those are
    /// Scheduler-level concerns (registry naming convention, sensor
    /// polling), so they are threaded through as plain inputs.
    pub fn submit(
        &mut self,
        job: MotionJob,
        rain_active: bool,
        is_roof_window: bool,
        now: f64,
    ) -> Result<(Disposition, Vec<Effect>), CoreError> {
        let disposition = arbiter::arbitrate(&self.state, job.level, true, now)?;

        match disposition {
            Disposition::Wait => {
                self.queue.push(job, now);
                Ok((Disposition::Wait, Vec::new()))
            }
            Disposition::Accept | Disposition::Preempt => {
                // A preemption must freeze the interrupted motion's position
                // first (spec.md §4.4) — `compute_motion` always resolves
                // the replacement job's direction/duration/no-op status
                // against `self.state.position_pct`, which during MOVING is
                // still the pre-motion start position until frozen here.
                if disposition == Disposition::Preempt && self.state.phase == Phase::Moving {
                    self.freeze_position_for_preemption(now);
                }

                let computation = self.compute_motion(&job.target)?;

                if let Some(err) = safety::rain_interlock_rejects(
                    rain_active,
                    job.level,
                    is_roof_window,
                    computation.direction == Direction::Open,
                ) {
                    return Err(err);
                }

                if computation.no_op {
                    if disposition == Disposition::Preempt {
                        // The replacement target needs no further motion,
                        // but the motion being preempted still has to stop.
                        return Ok(self.preempt(job, computation, 0.0, now));
                    }
                    info!(
                        actuator_id = %self.descriptor.id,
                        "target equals current position, no-op success"
                    );
                    return Ok((disposition, Vec::new()));
                }

                let clamped_duration =
                    safety::clamp_duration(&self.descriptor, computation.duration_sec);

                if disposition == Disposition::Preempt {
                    Ok(self.preempt(job, computation, clamped_duration, now))
                } else {
                    let effects = self.start_motion(
                        job,
                        computation.direction,
                        computation.target_pct,
                        clamped_duration,
                        now,
                    );
                    Ok((Disposition::Accept, effects))
                }
            }
        }
    }

    fn start_motion(
        &mut self,
        job: MotionJob,
        direction: Direction,
        target_pct: u8,
        duration_sec: f64,
        now: f64,
    ) -> Vec<Effect> {
        let is_irrigation = !self.descriptor.has_limit;
        let level = job.level;

        self.active = Some(ActiveMotion {
            start_pct: self.state.position_pct,
            target_pct,
            level,
            planned_duration_sec: duration_sec,
            direction,
            is_irrigation,
            pending_after_wait: None,
        });

        self.state.phase = Phase::Moving;
        self.state.last_direction = direction;
        self.state.current_level = Some(level);
        self.state.motion_started_at = Some(now);
        self.state.motion_ends_at = Some(now + duration_sec);
        self.state.cooling_ends_at = None;

        info!(
            actuator_id = %self.descriptor.id,
            target_pct,
            duration_sec,
            level,
            origin = %job.origin,
            "motion started"
        );

        vec![
            Effect::Send {
                actuator_type: format!("{}{}", self.descriptor.id, direction.wire_suffix()),
                value: 1,
                level,
            },
            Effect::ArmTimer {
                kind: TimerKind::Motion,
                duration_sec: secs_to_duration_floor(duration_sec),
            },
            Effect::Persist,
        ]
    }

    /// If this actuator is currently `MOVING`, compute the frozen position
    /// per the elapsed/planned-duration interpolation (spec.md §4.4) and
    /// write it into `self.state.position_pct` — nothing else is mutated.
    /// Idempotent for a fixed `now`: `submit` calls this before resolving
    /// the preempting job's direction/duration against the now-current
    /// position, and `preempt` calls it again (recomputing the identical
    /// value) as a safety net for any other future caller.
    fn freeze_position_for_preemption(&mut self, now: f64) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        if active.is_irrigation {
            return;
        }
        let elapsed = now - self.state.motion_started_at.unwrap_or(now);
        let fraction = if active.planned_duration_sec > 0.0 {
            (elapsed / active.planned_duration_sec).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let interpolated = active.start_pct as f64
            + (active.target_pct as f64 - active.start_pct as f64) * fraction;
        self.state.position_pct = ActuatorState::clamp_position(interpolated);
    }

    fn preempt(
        &mut self,
        job: MotionJob,
        computation: MotionComputation,
        clamped_duration: f64,
        now: f64,
    ) -> (Disposition, Vec<Effect>) {
        let mut effects = vec![Effect::CancelTimer];

        match self.state.phase {
            Phase::Moving => {
                self.freeze_position_for_preemption(now);

                let active = self
                    .active
                    .take()
                    .expect("MOVING implies an in-flight ActiveMotion");

                effects.push(Effect::Send {
                    actuator_type: format!("{}{}", self.descriptor.id, active.direction.wire_suffix()),
                    value: 0,
                    level: active.level,
                });
                self.state.motion_started_at = None;
                self.state.motion_ends_at = None;

                if computation.stop_only || computation.no_op {
                    // spec.md §4.8: emergency OFF is terminal, not a new ON.
                    // A preempting target equal to the just-frozen position
                    // is likewise terminal — there is no further motion to
                    // queue behind it.
                    self.state.phase = Phase::Idle;
                    self.state.current_level = None;
                    self.state.cooling_ends_at = None;
                    self.active = None;
                    effects.push(Effect::Persist);
                    info!(
                        actuator_id = %self.descriptor.id,
                        stop_only = computation.stop_only,
                        "motion preempted, stopped without a replacement motion"
                    );
                    return (Disposition::Preempt, effects);
                }

                let reversed = active.direction != Direction::None
                    && computation.direction != Direction::None
                    && computation.direction != active.direction;
                let wait = cooling_wait(job.level, reversed, &self.descriptor);

                self.state.phase = Phase::Cooling;
                self.state.current_level = Some(job.level);
                self.state.cooling_ends_at = Some(now + wait);

                self.active = Some(ActiveMotion {
                    start_pct: self.state.position_pct,
                    target_pct: computation.target_pct,
                    level: job.level,
                    planned_duration_sec: clamped_duration,
                    direction: computation.direction,
                    is_irrigation: !self.descriptor.has_limit,
                    pending_after_wait: Some(PendingJob { job }),
                });

                effects.push(Effect::ArmTimer {
                    kind: TimerKind::Cooling,
                    duration_sec: secs_to_duration_floor(wait),
                });
                effects.push(Effect::Persist);
                info!(actuator_id = %self.descriptor.id, wait, reversed, "motion preempted");
                (Disposition::Preempt, effects)
            }

            Phase::Cooling | Phase::Calibrating => {
                self.active = None;
                self.state.motion_ends_at = None;
                self.state.cooling_ends_at = None;

                if computation.stop_only || computation.no_op {
                    self.state.phase = Phase::Idle;
                    self.state.current_level = None;
                    effects.push(Effect::Persist);
                    return (Disposition::Preempt, effects);
                }

                let start_effects = self.start_motion(
                    job,
                    computation.direction,
                    computation.target_pct,
                    clamped_duration,
                    now,
                );
                effects.extend(start_effects);
                (Disposition::Preempt, effects)
            }

            Phase::Idle => unreachable!("arbiter never returns Preempt from IDLE"),
        }
    }

    /// Called by the Scheduler when a previously-armed timer fires.
    /// Returns the follow-on effects, or an empty vec if the timer had
    /// already been superseded by a preemption (spec.md §5: a timer that
    /// fires after being cancelled is a no-op).
    pub fn on_timer(&mut self, kind: TimerKind, now: f64, wall_now_unix: i64) -> Vec<Effect> {
        match (self.state.phase, kind) {
            (Phase::Moving, TimerKind::Motion) => self.finish_motion(now),
            (Phase::Cooling, TimerKind::Cooling) => self.finish_cooling(now),
            (Phase::Calibrating, TimerKind::Calibration) => self.finish_calibration(wall_now_unix),
            _ => Vec::new(),
        }
    }

    fn finish_motion(&mut self, now: f64) -> Vec<Effect> {
        let Some(active) = self.active.take() else {
            return Vec::new();
        };

        if !active.is_irrigation {
            self.state.position_pct = active.target_pct;
        }

        let mut effects = vec![Effect::Send {
            actuator_type: format!("{}{}", self.descriptor.id, active.direction.wire_suffix()),
            value: 0,
            level: active.level,
        }];

        let wait = self.descriptor.cooling_sec;
        self.state.phase = Phase::Cooling;
        self.state.motion_started_at = None;
        self.state.motion_ends_at = None;
        self.state.cooling_ends_at = Some(now + wait);

        effects.push(Effect::ArmTimer {
            kind: TimerKind::Cooling,
            duration_sec: secs_to_duration_floor(wait),
        });
        effects.push(Effect::Persist);
        info!(
            actuator_id = %self.descriptor.id,
            position = self.state.position_pct,
            "motion completed, entering cooling"
        );
        effects
    }

    fn finish_cooling(&mut self, now: f64) -> Vec<Effect> {
        match self.active.take() {
            Some(ActiveMotion {
                pending_after_wait: Some(PendingJob { job }),
                target_pct,
                direction,
                planned_duration_sec,
                ..
            }) => {
                info!(actuator_id = %self.descriptor.id, job_id = %job.job_id, "cooling wait elapsed, starting pending job");
                self.start_motion(job, direction, target_pct, planned_duration_sec, now)
            }
            _ => {
                self.state.phase = Phase::Idle;
                self.state.current_level = None;
                self.state.cooling_ends_at = None;
                vec![Effect::Persist]
            }
        }
    }

    /// Start calibration. Only valid from IDLE (Invariant 5); callers are
    /// expected to check the phase first, but this defends against a
    /// misbehaving caller too.
    pub fn start_calibration(&mut self, now: f64) -> Vec<Effect> {
        if self.state.phase != Phase::Idle {
            warn!(
                actuator_id = %self.descriptor.id,
                phase = ?self.state.phase,
                "calibration trigger ignored: actuator not idle"
            );
            return Vec::new();
        }

        let duration = self.descriptor.full_close_sec * 1.2;
        self.state.phase = Phase::Calibrating;
        self.state.last_direction = Direction::Close;
        self.state.current_level = Some(2);
        self.state.motion_started_at = Some(now);
        self.state.motion_ends_at = Some(now + duration);

        self.active = Some(ActiveMotion {
            start_pct: self.state.position_pct,
            target_pct: 0,
            level: 2,
            planned_duration_sec: duration,
            direction: Direction::Close,
            is_irrigation: false,
            pending_after_wait: None,
        });

        info!(actuator_id = %self.descriptor.id, duration, "calibration started");

        vec![
            Effect::Send {
                actuator_type: format!("{}{}", self.descriptor.id, Direction::Close.wire_suffix()),
                value: 1,
                level: 2,
            },
            Effect::ArmTimer {
                kind: TimerKind::Calibration,
                duration_sec: secs_to_duration_floor(duration),
            },
            Effect::Persist,
        ]
    }

    fn finish_calibration(&mut self, wall_now_unix: i64) -> Vec<Effect> {
        self.active = None;
        self.state.phase = Phase::Idle;
        self.state.position_pct = 0;
        self.state.last_direction = Direction::Close;
        self.state.current_level = None;
        self.state.motion_started_at = None;
        self.state.motion_ends_at = None;
        self.state.last_calibrated_at = Some(wall_now_unix);
        info!(actuator_id = %self.descriptor.id, "calibration completed, position reset to 0");
        vec![Effect::Persist]
    }

    /// Max-continuous watchdog pass (spec.md §4.7): forces a MOVING
    /// actuator OFF if it has run longer than its bound, independent of
    /// whether the motion timer itself fired. Returns `None` when there
    /// is nothing to do.
    pub fn check_overrun(&mut self, now: f64) -> Option<Vec<Effect>> {
        if self.state.phase != Phase::Moving {
            return None;
        }
        let started = self.state.motion_started_at?;
        let elapsed = now - started;
        let limit = if self.descriptor.has_limit {
            self.descriptor.max_continuous_sec()
        } else {
            self.descriptor
                .max_duration_sec
                .unwrap_or_else(|| self.descriptor.max_continuous_sec())
        };
        if elapsed <= limit {
            return None;
        }

        warn!(
            actuator_id = %self.descriptor.id,
            elapsed,
            limit,
            "max-continuous watchdog overrun, forcing OFF"
        );

        let active = self.active.take();
        let direction = active.as_ref().map(|a| a.direction).unwrap_or(Direction::None);
        let level = active.as_ref().map(|a| a.level).unwrap_or(4);
        if let Some(a) = &active {
            if !a.is_irrigation {
                self.state.position_pct = a.target_pct;
            }
        }

        self.state.motion_started_at = None;
        self.state.motion_ends_at = None;
        self.state.phase = Phase::Cooling;
        let wait = self.descriptor.cooling_sec;
        self.state.cooling_ends_at = Some(now + wait);
        self.state.current_level = Some(level);

        Some(vec![
            Effect::CancelTimer,
            Effect::Send {
                actuator_type: format!("{}{}", self.descriptor.id, direction.wire_suffix()),
                value: 0,
                level,
            },
            Effect::ArmTimer {
                kind: TimerKind::Cooling,
                duration_sec: secs_to_duration_floor(wait),
            },
            Effect::Persist,
        ])
    }

    /// Force this actuator to a safe stop without arming any further
    /// motion, for use during graceful shutdown (spec.md §9 Open
    /// Question: "the core's responsibility ends at sending the OFF").
    /// A no-op outside MOVING — COOLING/CALIBRATING already have no motor
    /// energised, and IDLE has nothing to stop.
    pub fn emergency_off(&mut self) -> Vec<Effect> {
        if self.state.phase != Phase::Moving {
            return Vec::new();
        }
        let active = self.active.take();
        let (direction, level) = active
            .map(|a| (a.direction, a.level))
            .unwrap_or((self.state.last_direction, self.state.current_level.unwrap_or(4)));

        self.state.phase = Phase::Idle;
        self.state.current_level = None;
        self.state.motion_started_at = None;
        self.state.motion_ends_at = None;

        vec![
            Effect::CancelTimer,
            Effect::Send {
                actuator_type: format!("{}{}", self.descriptor.id, direction.wire_suffix()),
                value: 0,
                level,
            },
            Effect::Persist,
        ]
    }

    /// Pull the next expired entry out of the command queue and apply it,
    /// if any. Called by the Scheduler whenever this actuator becomes
    /// idle (cooling/calibration finished with nothing pending) and also
    /// periodically to drop TTL-expired entries.
    pub fn drain_expired_queue(&mut self, now: f64) -> Vec<QueuedExpiry> {
        self.queue
            .expire(now)
            .into_iter()
            .map(|q| QueuedExpiry {
                job_id: q.job.job_id,
                actuator_id: q.job.actuator_id,
            })
            .collect()
    }

    pub fn pop_next_queued(
        &mut self,
        rain_active: bool,
        is_roof_window: bool,
        now: f64,
    ) -> Option<(MotionJob, Result<(Disposition, Vec<Effect>), CoreError>)> {
        let queued = self.queue.pop_next()?;
        let job = queued.job;
        let result = self.submit(job.clone(), rain_active, is_roof_window, now);
        Some((job, result))
    }
}

/// A queued job that expired before it could be dispatched
/// (`CoreError::QueuedExpired`, spec.md §7); the Scheduler logs/reports
/// this against whatever upstream tracking it keeps for queued jobs.
#[derive(Debug, Clone)]
pub struct QueuedExpiry {
    pub job_id: String,
    pub actuator_id: String,
}
