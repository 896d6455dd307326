//! HTTP(S) GET probe over hyper's HTTP/1.1 client connection.
//!
//! 2xx is healthy. 401/403 is an auth error; any other status is
//! unhealthy with detail `http_<code>`. Redirects are not followed.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::debug;

use depwatch_core::{
    BoxFuture, DependencyType, Endpoint, Probe, ProbeError, ProbeOutcome, ProbeSettings,
    StatusCategory,
};

use crate::tcp::connect;
use crate::tls::client_config;

pub const DEFAULT_PATH: &str = "/health";
const USER_AGENT: &str = concat!("depwatch/", env!("CARGO_PKG_VERSION"));

/// GETs a health path on each endpoint.
pub struct HttpProbe {
    path: String,
    /// Request headers, auth included. Applied after the user agent.
    headers: BTreeMap<String, String>,
    /// `None` for plain HTTP.
    tls: Option<Result<Arc<ClientConfig>, String>>,
}

impl HttpProbe {
    pub fn new(settings: &ProbeSettings) -> Self {
        let path = match settings.http_path.as_deref() {
            None | Some("") => DEFAULT_PATH.to_string(),
            Some(p) if p.starts_with('/') => p.to_string(),
            Some(p) => format!("/{p}"),
        };

        let mut headers = settings.http_headers.clone();
        if let Some(token) = &settings.http_bearer_token {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        if let Some(auth) = &settings.http_basic_auth {
            let encoded = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
            headers.insert("Authorization".to_string(), format!("Basic {encoded}"));
        }

        let tls = settings
            .http_tls
            .unwrap_or(false)
            .then(|| client_config(settings.http_tls_skip_verify).map_err(|e| e.to_string()));

        Self { path, headers, tls }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    async fn request(&self, endpoint: &Endpoint, deadline: Instant) -> ProbeOutcome {
        let stream = connect(endpoint, deadline).await?;
        let request = self.build_request(endpoint)?;

        let status = match &self.tls {
            None => send(TokioIo::new(stream), request).await?,
            Some(config) => {
                let config = config.clone().map_err(ProbeError::Tls)?;
                let server_name = ServerName::try_from(endpoint.host.clone())
                    .map_err(|e| ProbeError::Tls(e.to_string()))?;
                let tls_stream = TlsConnector::from(config)
                    .connect(server_name, stream)
                    .await
                    .map_err(handshake_error)?;
                send(TokioIo::new(tls_stream), request).await?
            }
        };

        status_outcome(status)
    }

    fn build_request(&self, endpoint: &Endpoint) -> Result<Request<Empty<Bytes>>, ProbeError> {
        let mut builder = Request::get(self.path.as_str())
            .header(http::header::HOST, endpoint.address())
            .header(http::header::USER_AGENT, USER_AGENT);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
            .body(Empty::new())
            .map_err(|e| ProbeError::Other(anyhow::Error::new(e).context("invalid http request")))
    }
}

impl Probe for HttpProbe {
    fn check<'a>(&'a self, endpoint: &'a Endpoint, deadline: Instant) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(async move {
            tokio::time::timeout_at(deadline, self.request(endpoint, deadline))
                .await
                .map_err(|_| ProbeError::Timeout)?
        })
    }

    fn dependency_type(&self) -> DependencyType {
        DependencyType::Http
    }
}

impl std::fmt::Debug for HttpProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProbe")
            .field("path", &self.path)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("tls", &self.is_tls())
            .finish()
    }
}

/// Send one request on a fresh HTTP/1.1 connection and return the status.
async fn send<T>(io: T, request: Request<Empty<Bytes>>) -> Result<StatusCode, ProbeError>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(http_error)?;

    // Drive the connection in the background.
    let driver = tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "http probe connection closed with error");
        }
    });

    let response = sender.send_request(request).await;
    driver.abort();
    Ok(response.map_err(http_error)?.status())
}

fn status_outcome(status: StatusCode) -> ProbeOutcome {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("http status {}", status.as_u16());
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ProbeError::classified(StatusCategory::AuthError, "auth_error", message));
    }
    Err(ProbeError::classified(
        StatusCategory::Unhealthy,
        format!("http_{}", status.as_u16()),
        message,
    ))
}

fn http_error(e: hyper::Error) -> ProbeError {
    ProbeError::Other(anyhow::Error::new(e).context("http request failed"))
}

/// A rustls failure is a TLS error; anything else stays an I/O error.
fn handshake_error(e: io::Error) -> ProbeError {
    let is_tls = e
        .get_ref()
        .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some());
    if is_tls {
        ProbeError::Tls(e.to_string())
    } else {
        ProbeError::Io(e)
    }
}
