//! An in-memory [`BusAdapter`] that records every send for assertions.
//!
//! Grounded on the teacher's use of `evo_hal::drivers::simulation` as the
//! non-hardware driver exercised by every test and the simulation CLI
//! mode: the core depends only on the `BusAdapter` trait, so tests swap in
//! this recorder instead of a real multicast socket.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{BusAdapter, BusError, OprReading, OprStream};

/// One recorded call to [`BusAdapter::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentPacket {
    pub actuator_id: String,
    pub value: u8,
    pub priority: u8,
    pub repeat: u8,
}

/// Records sends in order; lets tests inject an `opr` corroborator stream
/// and simulate a single I/O failure.
#[derive(Default)]
pub struct MockBusAdapter {
    sent: Mutex<Vec<SentPacket>>,
    pending_opr: Mutex<HashMap<String, mpsc::Receiver<OprReading>>>,
    fail_next: Mutex<bool>,
}

impl MockBusAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every packet sent so far, in call order.
    pub fn sent_packets(&self) -> Vec<SentPacket> {
        self.sent.lock().clone()
    }

    /// The most recent send, if any.
    pub fn last_sent(&self) -> Option<SentPacket> {
        self.sent.lock().last().cloned()
    }

    /// How many packets were sent for a given actuator id (including its
    /// source-tag suffix, since that is part of the wire type).
    pub fn send_count_for(&self, actuator_id: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|p| p.actuator_id == actuator_id)
            .count()
    }

    /// The next call to `send` will return `BusError::SendFailed` instead
    /// of succeeding, to exercise the `BUS_IO` error path.
    pub fn fail_next_send(&self) {
        *self.fail_next.lock() = true;
    }

    /// Register a fake `opr` corroborator stream for `actuator_id` and
    /// return the sending half so the test can push readings.
    pub fn register_opr_stream(
        &self,
        actuator_id: &str,
        capacity: usize,
    ) -> mpsc::Sender<OprReading> {
        let (tx, rx) = mpsc::channel(capacity);
        self.pending_opr.lock().insert(actuator_id.to_string(), rx);
        tx
    }
}

#[async_trait]
impl BusAdapter for MockBusAdapter {
    async fn send(
        &self,
        actuator_id: &str,
        value: u8,
        priority: u8,
        repeat: u8,
    ) -> Result<(), BusError> {
        let should_fail = {
            let mut guard = self.fail_next.lock();
            std::mem::replace(&mut *guard, false)
        };
        if should_fail {
            return Err(BusError::SendFailed(format!(
                "mock send failure for {actuator_id}"
            )));
        }
        self.sent.lock().push(SentPacket {
            actuator_id: actuator_id.to_string(),
            value,
            priority,
            repeat,
        });
        Ok(())
    }

    fn subscribe_opr(&self, actuator_id: &str) -> Option<OprStream> {
        self.pending_opr.lock().remove(actuator_id)
    }
}
