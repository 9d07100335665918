//! Per-`(actuator_id, level)` FIFO for commands waiting on a busy actuator
//! (C6 CommandQueue, spec.md §4.6).
//!
//! One [`CommandQueue`] is owned by each [`crate::fsm::ActuatorFsm`] and
//! covers all four submittable levels (L1 never waits, so it is never
//! enqueued here). Bounded per level; overflow drops the oldest entry of
//! the same level. `std::collections::VecDeque` is used rather than the
//! teacher's `heapless::Vec` — the teacher reaches for `heapless` only
//! because `evo_control_unit` is a hard-real-time, zero-allocation crate;
//! this scheduler runs on a standard `tokio` runtime with no RT budget, so
//! a heap-allocated bounded queue is the correct idiom here (`heapless` is
//! dropped for this crate; see DESIGN.md).

use std::collections::VecDeque;

use tracing::warn;

use crate::job::MotionJob;

/// A job waiting in a per-level queue, with the monotonic instant it was
/// enqueued so TTL expiry can be evaluated later.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: MotionJob,
    pub enqueued_at: f64,
}

/// Per-actuator bounded FIFOs, one per level 2..=4 (L1 never waits).
#[derive(Debug)]
pub struct CommandQueue {
    levels: [VecDeque<QueuedJob>; 3],
    depth: usize,
    ttl_sec: f64,
}

fn level_index(level: u8) -> Option<usize> {
    match level {
        2 => Some(0),
        3 => Some(1),
        4 => Some(2),
        _ => None,
    }
}

impl CommandQueue {
    pub fn new(depth: usize, ttl_sec: f64) -> Self {
        Self {
            levels: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            depth,
            ttl_sec,
        }
    }

    /// Enqueue `job` at its level, dropping the oldest same-level entry on
    /// overflow with a logged warning (spec.md §4.6).
    pub fn push(&mut self, job: MotionJob, now: f64) {
        let Some(idx) = level_index(job.level) else {
            warn!(level = job.level, "command queue does not accept this level");
            return;
        };
        let queue = &mut self.levels[idx];
        if queue.len() >= self.depth {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    actuator_id = %dropped.job.actuator_id,
                    job_id = %dropped.job.job_id,
                    level = dropped.job.level,
                    "command queue overflow, dropping oldest entry"
                );
            }
        }
        queue.push_back(QueuedJob {
            job,
            enqueued_at: now,
        });
    }

    /// Remove and return every entry whose TTL has elapsed as of `now`,
    /// across all levels, oldest first.
    pub fn expire(&mut self, now: f64) -> Vec<QueuedJob> {
        let mut expired = Vec::new();
        for queue in &mut self.levels {
            while let Some(front) = queue.front() {
                if now - front.enqueued_at > self.ttl_sec {
                    expired.push(queue.pop_front().unwrap());
                } else {
                    break;
                }
            }
        }
        expired
    }

    /// Pop the next job to run: the highest-priority (lowest level number)
    /// non-empty queue, oldest entry first.
    pub fn pop_next(&mut self) -> Option<QueuedJob> {
        for queue in &mut self.levels {
            if let Some(job) = queue.pop_front() {
                return Some(job);
            }
        }
        None
    }

    /// Whether every level's queue is empty.
    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, level: u8) -> MotionJob {
        MotionJob {
            job_id: id.to_string(),
            actuator_id: "VenSdWin".to_string(),
            target: greenhouse_common::intent::Target::Percent { value: 10 },
            level,
            origin: "test".to_string(),
        }
    }

    #[test]
    fn pop_next_drains_highest_priority_first() {
        let mut q = CommandQueue::new(16, 120.0);
        q.push(job("a", 4), 0.0);
        q.push(job("b", 2), 0.0);
        q.push(job("c", 3), 0.0);

        assert_eq!(q.pop_next().unwrap().job.job_id, "b");
        assert_eq!(q.pop_next().unwrap().job.job_id, "c");
        assert_eq!(q.pop_next().unwrap().job.job_id, "a");
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn overflow_drops_oldest_same_level() {
        let mut q = CommandQueue::new(2, 120.0);
        q.push(job("1", 3), 0.0);
        q.push(job("2", 3), 1.0);
        q.push(job("3", 3), 2.0);

        let mut drained = Vec::new();
        while let Some(j) = q.pop_next() {
            drained.push(j.job.job_id);
        }
        assert_eq!(drained, vec!["2", "3"]);
    }

    #[test]
    fn expire_removes_only_stale_entries() {
        let mut q = CommandQueue::new(16, 10.0);
        q.push(job("old", 3), 0.0);
        q.push(job("fresh", 3), 5.0);

        let expired = q.expire(11.5);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].job.job_id, "old");

        let remaining = q.pop_next().unwrap();
        assert_eq!(remaining.job.job_id, "fresh");
    }

    #[test]
    fn is_empty_reflects_all_levels() {
        let mut q = CommandQueue::new(16, 120.0);
        assert!(q.is_empty());
        q.push(job("a", 4), 0.0);
        assert!(!q.is_empty());
    }
}
