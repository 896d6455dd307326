//! TCP connect probe, plus the dialer shared by every probe.

use std::io;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use depwatch_core::{BoxFuture, DependencyType, Endpoint, Probe, ProbeError, ProbeOutcome};

/// Healthy when a TCP connection can be established.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl Probe for TcpProbe {
    fn check<'a>(&'a self, endpoint: &'a Endpoint, deadline: Instant) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(async move {
            let stream = connect(endpoint, deadline).await?;
            drop(stream);
            Ok(())
        })
    }

    fn dependency_type(&self) -> DependencyType {
        DependencyType::Tcp
    }
}

/// Resolve and connect to `endpoint` before `deadline`.
///
/// Resolution failures are DNS errors; a refusal from every resolved
/// address is `ConnectionRefused`.
pub(crate) async fn connect(endpoint: &Endpoint, deadline: Instant) -> Result<TcpStream, ProbeError> {
    tokio::time::timeout_at(deadline, dial(endpoint))
        .await
        .map_err(|_| ProbeError::Timeout)?
}

async fn dial(endpoint: &Endpoint) -> Result<TcpStream, ProbeError> {
    let dns_error = |message: String| ProbeError::Dns {
        host: endpoint.host.clone(),
        message,
    };
    let addrs = tokio::net::lookup_host(endpoint.address())
        .await
        .map_err(|e| dns_error(e.to_string()))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(connect_error(e)),
        None => Err(dns_error("no addresses resolved".to_string())),
    }
}

fn connect_error(e: io::Error) -> ProbeError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ProbeError::ConnectionRefused,
        _ => ProbeError::Io(e),
    }
}
