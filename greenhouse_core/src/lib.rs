//! # Greenhouse Control Core
//!
//! Priority-driven, preemptive scheduler for feedback-less,
//! duration-controlled greenhouse actuators (motorized windows, curtains,
//! irrigation valves). Owns the per-actuator state machine, the
//! priority/preemption arbiter, the per-actuator command queue, the
//! absolute safety bounds, and the scheduler that drives timers and
//! watchdogs — the same "brain" role `evo_control_unit` plays for axis
//! control, generalized from a fixed-rate real-time cycle to an
//! event/timer-driven model appropriate for a UDP control bus with no
//! feedback loop.
//!
//! [`scheduler::Scheduler`] is the entry point: construct one from a
//! loaded [`greenhouse_common::registry::ActuatorRegistry`], a
//! [`greenhouse_store::StateStore`], and a
//! [`greenhouse_bus::BusAdapter`], then call
//! [`scheduler::Scheduler::submit`] with upstream
//! [`greenhouse_common::intent::ControlIntent`]s.

pub mod arbiter;
pub mod fsm;
pub mod job;
pub mod queue;
pub mod safety;
pub mod scheduler;
