// Telemetry transports
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{AnalyticsError, Result};

const MESSAGE_BUFFER: usize = 512;

/// Opens a push feed. The returned receiver yields one raw JSON message per
/// item and ends when the remote side closes.
#[async_trait]
pub trait TelemetryConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<mpsc::Receiver<String>>;
}

/// Newline-delimited JSON over plain TCP (`tcp://host:port` or `host:port`)
#[derive(Debug, Clone, Default)]
pub struct TcpLineConnector;

impl TcpLineConnector {
    pub fn new() -> Self {
        Self
    }

    fn address(endpoint: &str) -> &str {
        endpoint.strip_prefix("tcp://").unwrap_or(endpoint)
    }
}

#[async_trait]
impl TelemetryConnector for TcpLineConnector {
    async fn connect(&self, endpoint: &str) -> Result<mpsc::Receiver<String>> {
        let addr = Self::address(endpoint);
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| AnalyticsError::Telemetry(format!("connect {} failed: {}", addr, e)))?;
        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
        let endpoint = endpoint.to_string();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        debug!(target: "telemetry", endpoint = %endpoint, "Receiver dropped; closing socket");
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let line = line.trim().to_string();
                            if line.is_empty() {
                                continue;
                            }
                            if tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(target: "telemetry", endpoint = %endpoint, "Remote closed feed");
                            break;
                        }
                        Err(e) => {
                            warn!(target: "telemetry", endpoint = %endpoint, error = %e, "Feed read failed");
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn strips_scheme() {
        assert_eq!(TcpLineConnector::address("tcp://10.0.0.1:7400"), "10.0.0.1:7400");
        assert_eq!(TcpLineConnector::address("localhost:7400"), "localhost:7400");
    }

    #[tokio::test]
    async fn reads_one_message_per_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"{\"equipmentId\":\"saw-1\"}\n\n{\"equipmentId\":\"saw-2\"}\n")
                .await
                .unwrap();
        });

        let mut rx = TcpLineConnector::new()
            .connect(&format!("tcp://{}", addr))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), "{\"equipmentId\":\"saw-1\"}");
        assert_eq!(rx.recv().await.unwrap(), "{\"equipmentId\":\"saw-2\"}");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn connect_failure_is_telemetry_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = TcpLineConnector::new()
            .connect(&addr.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Telemetry(_)));
    }
}
