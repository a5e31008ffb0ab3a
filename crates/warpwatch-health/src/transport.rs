//! Connection plumbing shared by the http probe and the webhook channel.
//!
//! One request per connection: resolve, connect, optionally wrap in TLS,
//! run an HTTP/1.1 handshake and send. The connection task is aborted as soon
//! as the caller drops the [`Exchange`], so nothing outlives a timed-out probe.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, Uri, Version};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::ProbeError;

const USER_AGENT: &str = concat!("warpwatch/", env!("CARGO_PKG_VERSION"));

/// A parsed `http://` or `https://` target.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub uri: Uri,
    pub https: bool,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, ProbeError> {
        let invalid = |reason: String| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;
        let https = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("http") => false,
            Some(s) if s.eq_ignore_ascii_case("https") => true,
            _ => return Err(invalid("scheme must be http or https".to_string())),
        };
        let host = uri
            .host()
            .ok_or_else(|| invalid("missing host".to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        Ok(Self {
            uri,
            https,
            host,
            port,
        })
    }

    pub fn socket_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn authority(&self) -> String {
        self.uri
            .authority()
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| self.socket_address())
    }

    fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/")
    }

    /// Build an origin-form request for this endpoint.
    pub fn request(
        &self,
        method: Method,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<Request<Full<Bytes>>, ProbeError> {
        let mut builder = Request::builder()
            .method(method)
            .uri(self.path_and_query())
            .header(http::header::HOST, self.authority())
            .header(http::header::USER_AGENT, USER_AGENT);
        if let Some(content_type) = content_type {
            builder = builder.header(http::header::CONTENT_TYPE, content_type);
        }
        builder
            .body(Full::new(body))
            .map_err(|e| ProbeError::InvalidUrl {
                url: self.uri.to_string(),
                reason: e.to_string(),
            })
    }
}

/// A response whose connection is still being driven in the background.
pub(crate) struct Exchange {
    pub response: Response<Incoming>,
    _driver: AbortOnDrop,
}

impl Exchange {
    /// Read the body to the end, discarding it.
    pub async fn drain(self) -> Result<(StatusCode, Version), ProbeError> {
        let Exchange { response, _driver } = self;
        let status = response.status();
        let version = response.version();

        let mut body = response.into_body();
        while let Some(frame) = body.frame().await {
            frame.map_err(ProbeError::Body)?;
        }

        Ok((status, version))
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Resolve `host:port` to at least one socket address.
pub(crate) async fn resolve(address: &str) -> Result<Vec<SocketAddr>, ProbeError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(address)
        .await
        .map_err(|source| ProbeError::Resolve {
            address: address.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ProbeError::NoAddress(address.to_string()));
    }
    Ok(addrs)
}

/// Connect to the first resolved address that accepts.
pub(crate) async fn connect_tcp(address: &str) -> Result<TcpStream, ProbeError> {
    let mut last_err = None;
    for addr in resolve(address).await? {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(source) => Err(ProbeError::Connect {
            address: address.to_string(),
            source,
        }),
        None => Err(ProbeError::NoAddress(address.to_string())),
    }
}

/// Send one request over a fresh connection.
pub(crate) async fn send(
    endpoint: &Endpoint,
    request: Request<Full<Bytes>>,
) -> Result<Exchange, ProbeError> {
    let stream = connect_tcp(&endpoint.socket_address()).await?;

    if endpoint.https {
        let server_name = ServerName::try_from(endpoint.host.as_str())
            .map_err(|e| ProbeError::Tls(format!("invalid server name '{}': {e}", endpoint.host)))?
            .to_owned();
        let tls = TlsConnector::from(tls_config()?)
            .connect(server_name, stream)
            .await
            .map_err(|e| ProbeError::Tls(e.to_string()))?;
        exchange(tls, request).await
    } else {
        exchange(stream, request).await
    }
}

async fn exchange<S>(io: S, request: Request<Full<Bytes>>) -> Result<Exchange, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(ProbeError::Request)?;

    let driver = AbortOnDrop(tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "http connection closed with error");
        }
    }));

    let response = sender
        .send_request(request)
        .await
        .map_err(ProbeError::Request)?;

    Ok(Exchange {
        response,
        _driver: driver,
    })
}

/// Client config backed by the Mozilla root store, built once per process.
fn tls_config() -> Result<Arc<rustls::ClientConfig>, ProbeError> {
    static CONFIG: OnceLock<Result<Arc<rustls::ClientConfig>, String>> = OnceLock::new();

    CONFIG
        .get_or_init(|| {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            rustls::ClientConfig::builder_with_provider(
                rustls::crypto::ring::default_provider().into(),
            )
            .with_safe_default_protocol_versions()
            .map(|builder| {
                Arc::new(
                    builder
                        .with_root_certificates(root_store)
                        .with_no_client_auth(),
                )
            })
            .map_err(|e| format!("tls protocol version error: {e}"))
        })
        .clone()
        .map_err(ProbeError::Tls)
}
