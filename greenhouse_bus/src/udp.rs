//! UDP multicast implementation of [`BusAdapter`].
//!
//! Binds an ephemeral local socket and sends to the UECS-CCM multicast
//! group. UDP gives no delivery guarantee, so each logical command is
//! retransmitted `repeat` times spaced by `repeat_spacing` (`spec.md` §4.3);
//! an internal async send-lock keeps retransmissions of one logical
//! command from interleaving with another command's packets, which is the
//! atomicity guarantee `spec.md` §5 requires of a shared sink.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::codec::{LineCodec, PacketCodec};
use crate::{BusAdapter, BusError, OprReading, OprStream};

/// Sends control packets to a UECS-CCM multicast group over UDP.
pub struct UdpBusAdapter {
    socket: UdpSocket,
    target: SocketAddr,
    codec: Box<dyn PacketCodec>,
    repeat_spacing: Duration,
    send_lock: AsyncMutex<()>,
}

impl UdpBusAdapter {
    /// Bind an ephemeral local socket and target `multicast_addr:port`.
    pub async fn bind(
        multicast_addr: Ipv4Addr,
        port: u16,
        repeat_spacing_ms: u64,
    ) -> Result<Self, BusError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| BusError::SetupFailed(e.to_string()))?;
        socket
            .set_multicast_ttl_v4(1)
            .map_err(|e| BusError::SetupFailed(e.to_string()))?;

        Ok(Self {
            socket,
            target: SocketAddr::V4(SocketAddrV4::new(multicast_addr, port)),
            codec: Box::new(LineCodec),
            repeat_spacing: Duration::from_millis(repeat_spacing_ms),
            send_lock: AsyncMutex::new(()),
        })
    }

    /// Replace the wire codec (e.g. with a real UECS-CCM XML codec).
    pub fn with_codec(mut self, codec: Box<dyn PacketCodec>) -> Self {
        self.codec = codec;
        self
    }
}

#[async_trait]
impl BusAdapter for UdpBusAdapter {
    async fn send(
        &self,
        actuator_id: &str,
        value: u8,
        priority: u8,
        repeat: u8,
    ) -> Result<(), BusError> {
        let _guard = self.send_lock.lock().await;
        let packet = self.codec.encode(actuator_id, value, priority);
        let attempts = repeat.max(1);

        for attempt in 0..attempts {
            self.socket
                .send_to(&packet, self.target)
                .await
                .map_err(|e| BusError::SendFailed(e.to_string()))?;
            debug!(actuator_id, value, priority, attempt, "sent control packet");
            if attempt + 1 < attempts {
                tokio::time::sleep(self.repeat_spacing).await;
            }
        }
        Ok(())
    }

    fn subscribe_opr(&self, _actuator_id: &str) -> Option<OprStream> {
        // The real `opr` status stream requires the UECS-CCM XML receive
        // path, which is out of scope for this core (spec.md §1). No
        // corroborator is available over this transport yet.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises the adapter end to end over loopback unicast (multicast
    /// group membership isn't guaranteed in a CI sandbox): binds a plain
    /// receiver socket and points the adapter at it directly.
    #[tokio::test]
    async fn retransmits_repeat_times_to_target() {
        let receiver = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();

        let adapter = UdpBusAdapter {
            socket: UdpSocket::bind(("127.0.0.1", 0)).await.unwrap(),
            target: receiver_addr,
            codec: Box::new(LineCodec),
            repeat_spacing: Duration::from_millis(1),
            send_lock: AsyncMutex::new(()),
        };

        adapter.send("Irri", 1, 10, 3).await.unwrap();

        let mut buf = [0u8; 128];
        for _ in 0..3 {
            let (n, _) = tokio::time::timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
                .await
                .expect("receive within timeout")
                .unwrap();
            let line = String::from_utf8_lossy(&buf[..n]);
            assert_eq!(line, "type=Irri&value=1&priority=10\n");
        }
    }

    #[tokio::test]
    async fn subscribe_opr_returns_none() {
        let adapter = UdpBusAdapter::bind(Ipv4Addr::new(127, 0, 0, 1), 0, 50)
            .await
            .unwrap();
        assert!(adapter.subscribe_opr("VenSdWin").is_none());
    }
}
