//! HTTP client for live calls to the upstream service

use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::proxy::Upstream;
use crate::request::{encode_params, Body, RequestDescriptor, ResponseDescriptor};
use crate::{ProxyError, Result};

/// Upstream transport over a pooled hyper client
pub struct HttpUpstream {
    client: Client<HttpConnector, Full<Bytes>>,
    base: String,
    timeout: Duration,
}

impl HttpUpstream {
    /// Create a client for the base endpoint `base`, e.g. `http://host:port`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `base` is not an absolute http URI
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let uri: Uri = base
            .parse()
            .map_err(|e| ProxyError::ConfigError(format!("Invalid upstream '{base}': {e}")))?;
        if uri.scheme_str() != Some("http") || uri.authority().is_none() {
            return Err(ProxyError::ConfigError(format!(
                "Upstream must be an absolute http URI: {base}"
            )));
        }

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn send(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor> {
        let uri = target_uri(&self.base, request)?;
        debug!("Forwarding {} to {}", request.method, uri);

        let mut builder = Request::builder().method(request.method.as_str()).uri(uri);

        // hyper sets Content-Length from the buffered body
        for (name, value) in &request.headers {
            if !name.eq_ignore_ascii_case("content-length") {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let body = if request.method.uses_query_parameters() {
            Bytes::new()
        } else {
            Bytes::from(request.body.to_wire())
        };

        let http_request = builder
            .body(Full::new(body))
            .map_err(|e| ProxyError::Upstream(format!("Failed to build request: {e}")))?;

        let response = self
            .client
            .request(http_request)
            .await
            .map_err(|e| ProxyError::Upstream(format!("Request failed: {e}")))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ProxyError::Upstream(format!("Failed to read response body: {e}")))?
            .to_bytes();

        Ok(ResponseDescriptor {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn dispatch(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor> {
        tokio::time::timeout(self.timeout, self.send(request))
            .await
            .map_err(|_| {
                ProxyError::Upstream(format!(
                    "{} {} timed out after {:?}",
                    request.method, request.path, self.timeout
                ))
            })?
    }
}

/// Build the upstream URI; GET and DELETE parameters become the query string
fn target_uri(base: &str, request: &RequestDescriptor) -> Result<Uri> {
    let mut uri = format!("{base}{}", request.path);

    if request.method.uses_query_parameters() {
        if let Body::Form(params) = &request.body {
            if !params.is_empty() {
                uri.push('?');
                uri.push_str(&encode_params(params));
            }
        }
    }

    uri.parse::<Uri>()
        .map_err(|e| ProxyError::Upstream(format!("Invalid URI '{uri}': {e}")))
}
