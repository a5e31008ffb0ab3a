//! Reachability probes.
//!
//! A probe is a single bounded attempt: an HTTP GET for `http` services, a
//! plain connect for everything else. There are no retries here; the next
//! scheduled tick is the retry.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use warpwatch_core::{Protocol, Service};

use crate::error::ProbeError;
use crate::transport::{self, Endpoint};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of one probe.
#[derive(Debug)]
pub struct CheckOutcome {
    pub ok: bool,
    pub err: Option<ProbeError>,
}

impl CheckOutcome {
    pub fn success() -> Self {
        Self { ok: true, err: None }
    }

    pub fn failure(err: ProbeError) -> Self {
        Self {
            ok: false,
            err: Some(err),
        }
    }
}

impl From<Result<(), ProbeError>> for CheckOutcome {
    fn from(result: Result<(), ProbeError>) -> Self {
        match result {
            Ok(()) => CheckOutcome::success(),
            Err(e) => CheckOutcome::failure(e),
        }
    }
}

/// Performs one reachability check against one service.
pub trait Prober: Send + Sync + 'static {
    fn probe<'a>(&'a self, service: &'a Service, timeout: Duration)
    -> BoxFuture<'a, CheckOutcome>;
}

/// Prober that talks to the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetProber;

impl Prober for NetProber {
    fn probe<'a>(
        &'a self,
        service: &'a Service,
        timeout: Duration,
    ) -> BoxFuture<'a, CheckOutcome> {
        Box::pin(async move {
            let address = service.probe_address();
            match service.protocol {
                Protocol::Http => http_probe(&address, timeout).await,
                Protocol::Tcp => tcp_probe(&address, timeout).await,
                Protocol::Udp => udp_probe(&address, timeout).await,
            }
        })
    }
}

/// GET `url` and drain the body. Any status code counts as reachable.
pub async fn http_probe(url: &str, timeout: Duration) -> CheckOutcome {
    let result = tokio::time::timeout(timeout, async {
        let endpoint = Endpoint::parse(url)?;
        let request = endpoint.request(Method::GET, Bytes::new(), None)?;
        let exchange = transport::send(&endpoint, request).await?;
        let (status, version) = exchange.drain().await?;
        info!(%status, ?version, %url, "probe response");
        Ok::<(), ProbeError>(())
    })
    .await;

    finish(url, timeout, result)
}

/// Open a TCP connection to `address` and close it immediately.
pub async fn tcp_probe(address: &str, timeout: Duration) -> CheckOutcome {
    let result = tokio::time::timeout(timeout, async {
        let stream = transport::connect_tcp(address).await?;
        drop(stream);
        Ok::<(), ProbeError>(())
    })
    .await;

    finish(address, timeout, result)
}

/// Bind a local UDP socket and connect it to `address`.
///
/// UDP is connectionless, so this only proves the address resolves and is
/// routable from here.
pub async fn udp_probe(address: &str, timeout: Duration) -> CheckOutcome {
    let result = tokio::time::timeout(timeout, async {
        let target = transport::resolve(address).await?[0];
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| ProbeError::Connect {
                address: address.to_string(),
                source,
            })?;
        socket
            .connect(target)
            .await
            .map_err(|source| ProbeError::Connect {
                address: address.to_string(),
                source,
            })?;
        Ok::<(), ProbeError>(())
    })
    .await;

    finish(address, timeout, result)
}

fn finish(
    address: &str,
    timeout: Duration,
    result: Result<Result<(), ProbeError>, tokio::time::error::Elapsed>,
) -> CheckOutcome {
    let outcome: CheckOutcome = result
        .unwrap_or(Err(ProbeError::Timeout(timeout)))
        .into();
    if let Some(err) = &outcome.err {
        debug!(%address, error = %err, "probe failed");
    }
    outcome
}
