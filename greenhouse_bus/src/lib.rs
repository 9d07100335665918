//! Abstract send/receive of CCM control-bus commands and operational-status
//! readings.
//!
//! The actual UECS-CCM XML framing and node discovery are out of scope for
//! this core; [`BusAdapter`] is the trait the scheduler depends on, and
//! [`codec::PacketCodec`] isolates the wire format so a real XML codec can
//! be swapped in later without touching the adapter or the core — the same
//! separation the teacher draws between a HAL driver's trait surface and
//! its concrete driver implementation.

pub mod codec;
pub mod mock;
pub mod udp;

use thiserror::Error;

/// An operational-status reading observed from the bus.
///
/// The core treats this as an optional corroborator, never authoritative
/// (`spec.md`'s "Absent feedback" design note).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OprReading {
    /// Observed value (0 or 1).
    pub value: u8,
    /// Monotonic instant the reading was observed, seconds since an
    /// arbitrary epoch private to the process.
    pub observed_at: f64,
}

/// Errors from the bus transport layer.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("bus send failed: {0}")]
    SendFailed(String),
    #[error("bus socket setup failed: {0}")]
    SetupFailed(String),
}

/// A receiver of [`OprReading`]s for one actuator id.
pub type OprStream = tokio::sync::mpsc::Receiver<OprReading>;

/// The contract the scheduler depends on to talk to the physical bus.
///
/// Implementations retransmit `repeat` times at a fixed spacing and must
/// never interleave retransmissions of one logical command with another
/// command's packets for the same actuator (the atomicity guarantee the
/// concurrency model requires of a shared sink).
#[async_trait::async_trait]
pub trait BusAdapter: Send + Sync {
    /// Emit a control packet for `actuator_id`, retransmitted `repeat` times.
    async fn send(
        &self,
        actuator_id: &str,
        value: u8,
        priority: u8,
        repeat: u8,
    ) -> Result<(), BusError>;

    /// Subscribe to the actuator's observed operational status, if the bus
    /// provides one. Returns `None` when no corroborating stream exists.
    fn subscribe_opr(&self, actuator_id: &str) -> Option<OprStream>;
}
