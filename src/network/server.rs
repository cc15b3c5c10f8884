//! Inbound HTTP listener
//!
//! Accepts connections, answers the health check itself and hands every
//! other request to the [`CassetteProxy`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::proxy::CassetteProxy;
use crate::request::{InboundRequest, ResponseDescriptor};
use crate::{ProxyError, Result};

use super::connection_pool::ConnectionPool;
use super::SHUTDOWN_TIMEOUT_MS;

/// Body returned by the health endpoint
pub const HEALTH_BODY: &str = r#"{"status":"OK"}"#;

/// Response headers that describe the original framing, not the content
const HOP_BY_HOP: [&str; 4] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
];

/// Front-end server in front of a [`CassetteProxy`]
pub struct ProxyServer {
    proxy: Arc<CassetteProxy>,
    listen_port: u16,
    max_request_size: usize,
    connection_pool: ConnectionPool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ProxyServer {
    /// Create a server for `proxy` using the listener settings in `config`
    #[must_use]
    pub fn new(proxy: Arc<CassetteProxy>, config: &Config) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            proxy,
            listen_port: config.listen_port,
            max_request_size: config.limits.max_request_size,
            connection_pool: ConnectionPool::new(config.limits.max_connections),
            shutdown_tx,
        }
    }

    /// Sender that stops the server when signalled
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind `0.0.0.0:<listen_port>` and serve until Ctrl-C or shutdown
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.listen_port));
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", addr);

        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received SIGINT, shutting down");
                shutdown_tx.send(()).ok();
            }
        });

        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    ///
    /// # Errors
    ///
    /// Currently never fails; accept errors are logged and skipped
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Accept error: {}", e);
                            continue;
                        }
                    };

                    let Some(guard) = self.connection_pool.try_acquire() else {
                        warn!(
                            "Connection limit of {} reached, rejecting {}",
                            self.connection_pool.max_connections(),
                            peer_addr
                        );
                        drop(stream);
                        continue;
                    };
                    debug!(
                        "Accepted {} ({} active)",
                        peer_addr,
                        self.connection_pool.active_connections()
                    );

                    let proxy = Arc::clone(&self.proxy);
                    let max_request_size = self.max_request_size;

                    connections.spawn(async move {
                        let _guard = guard;
                        let service = service_fn(move |request| {
                            let proxy = Arc::clone(&proxy);
                            async move {
                                Ok::<_, Infallible>(route(&proxy, request, max_request_size).await)
                            }
                        });

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("Connection from {} closed with error: {}", peer_addr, e);
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("Listener shutting down");
                    break;
                }
            }
        }

        let stats = self.proxy.stats();
        info!(
            "Served {} replayed, {} recorded, {} failed",
            stats.replayed, stats.recorded, stats.failed
        );

        let drain = async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Connection task error: {}", e);
                }
            }
        };
        if tokio::time::timeout(Duration::from_millis(SHUTDOWN_TIMEOUT_MS), drain)
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached, aborting open connections");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

async fn route(
    proxy: &CassetteProxy,
    request: Request<Incoming>,
    max_request_size: usize,
) -> Response<Full<Bytes>> {
    if *request.method() == Method::GET && request.uri().path() == "/" {
        return text_response(StatusCode::OK, HEALTH_BODY);
    }

    let inbound = match read_inbound(request, max_request_size).await {
        Ok(inbound) => inbound,
        Err(e) => return error_response(&e),
    };

    match proxy.handle_inbound(inbound).await {
        Ok(response) => proxied_response(response),
        Err(e) => error_response(&e),
    }
}

/// Capture method, path, query, headers and body off the wire
async fn read_inbound(request: Request<Incoming>, max_size: usize) -> Result<InboundRequest> {
    if let Some(length) = request
        .headers()
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
    {
        if length > max_size {
            return Err(ProxyError::DataTooLarge {
                size: length,
                limit: max_size,
            });
        }
    }

    let (parts, body) = request.into_parts();
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let body = body
        .collect()
        .await
        .map_err(|e| ProxyError::Other(format!("Failed to read body: {e}")))?
        .to_bytes();
    if body.len() > max_size {
        return Err(ProxyError::DataTooLarge {
            size: body.len(),
            limit: max_size,
        });
    }

    Ok(InboundRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers,
        body,
    })
}

fn proxied_response(descriptor: ResponseDescriptor) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(descriptor.body)));
    *response.status_mut() =
        StatusCode::from_u16(descriptor.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let headers = response.headers_mut();
    for (name, value) in &descriptor.headers {
        if HOP_BY_HOP.iter().any(|hop| name.eq_ignore_ascii_case(hop)) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!("Dropping unrepresentable response header {}", name),
        }
    }

    response
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
}

/// Map an error onto the status the client sees
fn error_response(error: &ProxyError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    text_response(status, &format!("Error: {error}"))
}
