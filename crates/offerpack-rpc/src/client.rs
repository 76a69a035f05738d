//! JSON-over-HTTP/1 procedure calls.
//!
//! A call is a `POST {base}/{Service}.{Procedure}` with a JSON body. Each
//! call opens its own connection; calls are infrequent relative to the
//! work they carry.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{RpcError, RpcResult};
use crate::wire::Reply;

/// An authority's base URL, e.g. `http://10.0.0.5:5290` or
/// `http://rm.local:5290/api`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `host:port` to connect to.
    address: String,
    /// Path prefix without a trailing slash.
    prefix: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> RpcResult<Self> {
        let invalid = |reason: &str| RpcError::InvalidEndpoint {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let uri: http::Uri = url.parse().map_err(|_| invalid("not a URI"))?;
        if uri.scheme_str() != Some("http") {
            return Err(invalid("scheme must be http"));
        }
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let port = authority.port_u16().unwrap_or(80);

        Ok(Self {
            address: format!("{}:{port}", authority.host()),
            prefix: uri.path().trim_end_matches('/').to_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Request path for a procedure.
    pub fn path(&self, procedure: &str) -> String {
        format!("{}/{procedure}", self.prefix)
    }
}

/// Issues procedure calls against one endpoint with a per-call timeout.
#[derive(Debug, Clone)]
pub struct JsonClient {
    endpoint: Endpoint,
    timeout: Duration,
}

impl JsonClient {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Call `procedure`, returning the decoded reply or its error payload.
    pub async fn call<Req, Resp>(&self, procedure: &str, request: &Req) -> RpcResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Reply,
    {
        let body = serde_json::to_vec(request).map_err(RpcError::Encode)?;
        let (status, bytes) = tokio::time::timeout(self.timeout, self.post(procedure, body))
            .await
            .map_err(|_| RpcError::Timeout(self.timeout))??;

        if !status.is_success() {
            return Err(RpcError::Status {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let mut reply: Resp = serde_json::from_slice(&bytes).map_err(RpcError::Decode)?;
        match reply.take_error() {
            Some(error) => Err(RpcError::Remote(error)),
            None => Ok(reply),
        }
    }

    async fn post(&self, procedure: &str, body: Vec<u8>) -> RpcResult<(http::StatusCode, Bytes)> {
        let address = self.endpoint.address();
        let path = self.endpoint.path(procedure);

        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|source| RpcError::Connect {
                address: address.to_string(),
                source,
            })?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(RpcError::Handshake)?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "rpc connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method(http::Method::POST)
            .uri(&path)
            .header(http::header::HOST, address)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::USER_AGENT, "offerpack-rpc/0.1")
            .body(Full::new(Bytes::from(body)))?;

        debug!(%path, %address, "rpc call");
        let resp = sender.send_request(req).await.map_err(RpcError::Interrupted)?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(RpcError::Interrupted)?
            .to_bytes();
        Ok((status, bytes))
    }
}
