//! TCP reachability probe.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::core::HealthProbe;

/// Healthy when a TCP connection to the address completes within the timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    /// Probe with its own connect timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self, address: &str) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(address, error = %e, "probe connect failed");
                false
            }
            Err(_) => {
                tracing::debug!(address, "probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_listening_port_is_healthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let probe = TcpProbe::new(Duration::from_millis(500));
        assert!(probe.probe(&addr).await);
    }

    #[tokio::test]
    async fn test_closed_port_is_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let probe = TcpProbe::new(Duration::from_millis(500));
        assert!(!probe.probe(&addr).await);
        assert!(!probe.probe("not an address").await);
    }
}
