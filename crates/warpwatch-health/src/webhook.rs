//! Webhook notification channel.
//!
//! POSTs `{"text": "<message>"}` to the configured URL, the payload shape
//! chat incoming-webhooks accept. Any 2xx counts as delivered.

use bytes::Bytes;
use http::Method;
use serde_json::json;

use crate::error::{NotifyError, NotifyResult};
use crate::notify::Notifier;
use crate::probe::BoxFuture;
use crate::transport::{self, Endpoint};

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    endpoint: Endpoint,
    name: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> NotifyResult<Self> {
        let endpoint = Endpoint::parse(url)?;
        let name = format!("webhook {}", endpoint.socket_address());
        Ok(Self { endpoint, name })
    }

    async fn post(&self, message: &str) -> NotifyResult<()> {
        let body = serde_json::to_vec(&json!({ "text": message }))?;
        let request =
            self.endpoint
                .request(Method::POST, Bytes::from(body), Some("application/json"))?;
        let exchange = transport::send(&self.endpoint, request).await?;
        let (status, _) = exchange.drain().await?;

        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected(status))
        }
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify<'a>(&'a self, message: &'a str) -> BoxFuture<'a, NotifyResult<()>> {
        Box::pin(self.post(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Accept one request, hand its raw bytes back and answer with `status_line`.
    async fn capture_server(status_line: &'static str) -> (SocketAddr, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            // Read until the JSON body has arrived.
            while !String::from_utf8_lossy(&raw).ends_with('}') {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }
            let _ = tx.send(String::from_utf8_lossy(&raw).into_owned());
            let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
        });

        (addr, rx)
    }

    #[tokio::test]
    async fn posts_json_payload() {
        let (addr, captured) = capture_server("HTTP/1.1 200 OK").await;
        let notifier = WebhookNotifier::new(&format!("http://{addr}/hooks/abc")).unwrap();

        notifier.notify("db (tcp 10.0.0.5:5432) unreachable").await.unwrap();

        let raw = captured.await.unwrap();
        assert!(raw.starts_with("POST /hooks/abc HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(raw.ends_with(r#"{"text":"db (tcp 10.0.0.5:5432) unreachable"}"#));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (addr, _captured) = capture_server("HTTP/1.1 403 Forbidden").await;
        let notifier = WebhookNotifier::new(&format!("http://{addr}/")).unwrap();

        let err = notifier.notify("down").await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(s) if s == http::StatusCode::FORBIDDEN));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(WebhookNotifier::new("mailto:ops@example.com").is_err());
    }
}
