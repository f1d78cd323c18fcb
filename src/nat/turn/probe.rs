// src/nat/turn/probe.rs
//! One-shot allocation probe against a TURN server over TCP

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::nat::error::{AllocationError, NatResult};
use super::allocation::{AllocationResult, AllocationSession};
use super::config::TurnProbeConfig;

/// Connect to the configured server and drive one allocation attempt.
///
/// Configuration errors are returned as `Err`; every protocol or network
/// outcome is reported inside the `AllocationResult`.
pub async fn probe(config: &TurnProbeConfig) -> NatResult<AllocationResult> {
    config.validate()?;

    let server = config.server_address();
    info!("Probing TURN server {} over TCP", server);

    let stream = match timeout(config.timeout, TcpStream::connect(&server)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let err = AllocationError::ConnectFailure { server, reason: e.to_string() };
            warn!("{}", err);
            return Ok(AllocationResult::failed(&err));
        }
        Err(_) => {
            let err = AllocationError::ConnectFailure {
                server,
                reason: format!("no connection within {:?}", config.timeout),
            };
            warn!("{}", err);
            return Ok(AllocationResult::failed(&err));
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    Ok(AllocationSession::new(stream, config.clone()).run().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_invalid_config_is_an_error() {
        let config = TurnProbeConfig::new("");
        assert!(probe(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = TurnProbeConfig::new("127.0.0.1")
            .with_port(port)
            .with_timeout(Duration::from_secs(2));
        let result = probe(&config).await.unwrap();

        let failure = result.error.unwrap();
        assert_eq!(failure.kind, "connect_failure");
        assert!(result.relayed_address.is_none());
    }
}
