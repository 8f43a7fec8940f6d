use tokio::net::TcpStream;

use crate::error::RelayError;
use crate::pump::{Pump, PumpHandle, PumpSummary, PumpTimeouts};

/// Two pumps wired in opposite directions over one proxied connection.
/// "Upstream" relays client bytes toward the server, "downstream" relays
/// server bytes back to the client; each direction carries its own hook set.
pub struct Tunnel {
    upstream: PumpHandle,
    downstream: PumpHandle,
}

impl Tunnel {
    /// Start both pumps. Register hooks on the pumps before calling this.
    pub fn start(upstream: Pump, downstream: Pump) -> Self {
        Self {
            upstream: upstream.start(),
            downstream: downstream.start(),
        }
    }

    /// Build the two directions from an accepted client connection and an
    /// already-dialed server connection.
    pub fn pumps_for(
        client: TcpStream,
        server: TcpStream,
        timeouts: PumpTimeouts,
    ) -> (Pump, Pump) {
        let (client_read, client_write) = client.into_split();
        let (server_read, server_write) = server.into_split();
        let upstream = Pump::with_timeouts(
            Some(Box::new(client_read)),
            Some(Box::new(server_write)),
            timeouts,
        );
        let downstream = Pump::with_timeouts(
            Some(Box::new(server_read)),
            Some(Box::new(client_write)),
            timeouts,
        );
        (upstream, downstream)
    }

    pub fn upstream(&self) -> &PumpHandle {
        &self.upstream
    }

    pub fn downstream(&self) -> &PumpHandle {
        &self.downstream
    }

    /// Graceful shutdown of both directions.
    pub fn close(&self) {
        self.upstream.close();
        self.downstream.close();
    }

    /// Abort both directions, waking any in-flight reads.
    pub fn force_close(&self) {
        self.upstream.force_close();
        self.downstream.force_close();
    }

    /// Wait for both loops to finish and report how each direction ended.
    pub async fn join(mut self) -> Result<(PumpSummary, PumpSummary), RelayError> {
        let upstream = self.upstream.join().await?;
        let downstream = self.downstream.join().await?;
        Ok((upstream, downstream))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::Tunnel;
    use crate::pump::{Pump, StopReason};

    #[tokio::test]
    async fn relays_both_directions_and_force_closes() {
        let (mut client, pump_client) = tokio::io::duplex(64 * 1024);
        let (mut server, pump_server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(pump_client);
        let (server_read, server_write) = tokio::io::split(pump_server);

        let upstream = Pump::new(Some(Box::new(client_read)), Some(Box::new(server_write)));
        let downstream = Pump::new(Some(Box::new(server_read)), Some(Box::new(client_write)));
        let tunnel = Tunnel::start(upstream, downstream);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        tunnel.force_close();
        let (up, down) = tokio::time::timeout(Duration::from_secs(5), tunnel.join())
            .await
            .expect("join within bound")
            .expect("join");
        assert_eq!(up.reason, StopReason::Stopped);
        assert_eq!(down.reason, StopReason::Stopped);
        assert_eq!(up.bytes_forwarded, 4);
        assert_eq!(down.bytes_forwarded, 4);
    }
}
