// ABOUTME: HTTP GET seam used by health probes and smoke tests.
// ABOUTME: HttpChecker speaks HTTP/1.1 over a fresh TCP connection via hyper.

use async_trait::async_trait;
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

/// Errors from a single HTTP check.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("HTTP error from {address}: {reason}")]
    Http { address: String, reason: String },

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Issue an HTTP GET against an instance and report the status code.
///
/// Callers bound each call with their own timeout.
#[async_trait]
pub trait HttpCheck: Send + Sync {
    async fn get_status(&self, address: &str, path: &str) -> Result<u16, ProbeError>;
}

/// Plain HTTP/1.1 checker with one connection per request.
#[derive(Debug, Clone, Default)]
pub struct HttpChecker {
    user_agent: Option<String>,
}

impl HttpChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

#[async_trait]
impl HttpCheck for HttpChecker {
    async fn get_status(&self, address: &str, path: &str) -> Result<u16, ProbeError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| ProbeError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProbeError::Http {
                address: address.to_string(),
                reason: format!("handshake failed: {e}"),
            })?;

        // Drive the connection in the background.
        let peer = address.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("probe connection to {} closed: {}", peer, e);
            }
        });

        let user_agent = self
            .user_agent
            .as_deref()
            .unwrap_or(concat!("kuapo/", env!("CARGO_PKG_VERSION")));

        let req = hyper::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", address)
            .header("user-agent", user_agent)
            .body(Empty::<bytes::Bytes>::new())
            .map_err(|e| ProbeError::Http {
                address: address.to_string(),
                reason: format!("failed to build request: {e}"),
            })?;

        let resp = sender.send_request(req).await.map_err(|e| ProbeError::Http {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

        Ok(resp.status().as_u16())
    }
}
