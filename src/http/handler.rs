//! Per-connection HTTP/1.1 serving.
//!
//! # Request flow
//! ```text
//! hyper::Request
//!     → HttpRequest (body collected up to client_message_buffer_size)
//!     → admin prefix? → admin pseudo-domain
//!       else Host / default_domain → DomainRegistry
//!     → domain enabled? domain blacklist?
//!     → domain pipeline on the blocking pool, bounded by response_client_timeout
//!     → hyper::Response
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::admin::is_admin_path;
use crate::context::ServerContext;
use crate::domain::Domain;
use crate::http::request::HttpRequest;
use crate::http::response::minimal_response;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::net::ConnectionInfo;
use crate::observability::metrics;
use crate::pipeline::ServiceContext;
use crate::statistics::timestamp_ms;

/// Returned to hyper to drop the connection without a response.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("client {0} is blacklisted by the domain, connection closed")]
    Blacklisted(String),
}

/// Serve HTTP/1.1 requests on `stream` until the client leaves, the
/// keep-alive timeout passes, or `shutdown` fires.
pub async fn serve_connection<S>(
    stream: S,
    info: ConnectionInfo,
    server: Arc<ServerContext>,
    mut shutdown: ShutdownSignal,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let keep_alive = server.parameters().keep_alive_timeout();
    let log_id = info.log_id();
    let service = service_fn(move |request| handle(request, info.clone(), Arc::clone(&server)));

    let connection = http1::Builder::new()
        .timer(TokioTimer::new())
        .keep_alive(true)
        .header_read_timeout(keep_alive)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(conn = %log_id, error = %e, "Connection ended with error");
            }
        }
        _ = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.as_mut().await {
                tracing::debug!(conn = %log_id, error = %e, "Connection ended during shutdown");
            }
        }
    }
}

/// Answer every request on `stream` with `code`, then close.
pub async fn serve_rejection<S>(stream: S, code: u16, timeout: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |_request: hyper::Request<Incoming>| async move {
        Ok::<_, Infallible>(minimal_response(code))
    });
    let connection = http1::Builder::new()
        .timer(TokioTimer::new())
        .keep_alive(false)
        .header_read_timeout(timeout)
        .serve_connection(TokioIo::new(stream), service);
    if let Err(e) = connection.await {
        tracing::debug!(code, error = %e, "Rejection not delivered");
    }
}

async fn handle(
    request: hyper::Request<Incoming>,
    info: ConnectionInfo,
    server: Arc<ServerContext>,
) -> Result<hyper::Response<Full<Bytes>>, HandlerError> {
    let received_at_ms = timestamp_ms();
    let parameters = server.parameters();

    let request = match convert(request, parameters.client_message_buffer_size, received_at_ms).await {
        Ok(request) => request,
        Err(code) => return Ok(minimal_response(code)),
    };

    let domain = match route(&server, &request, &info) {
        Ok(domain) => domain,
        Err(code) => return Ok(minimal_response(code)),
    };

    let client = info.client_ip();
    if let Some(action) = domain.blacklist().action(&client) {
        domain.telemetry().nof_blacklisted_accesses.increment();
        metrics::record_blacklist_rejection("domain", action.as_str());
        tracing::info!(
            conn = %info.log_id(),
            domain = %domain.name(),
            client = %client,
            action = %action,
            "Blacklisted client rejected"
        );
        return match action.status_code() {
            Some(code) => Ok(minimal_response(code)),
            None => Err(HandlerError::Blacklisted(client)),
        };
    }

    let log_id = info.log_id();
    let pipeline = domain.pipeline();
    let mut ctx = ServiceContext::new(request, info, domain, server);
    let worker = tokio::task::spawn_blocking(move || {
        pipeline.run(&mut ctx);
        ctx.response
    });

    let response = match tokio::time::timeout(parameters.response_timeout(), worker).await {
        Ok(Ok(response)) => response.into_hyper(),
        Ok(Err(e)) => {
            tracing::error!(conn = %log_id, error = %e, "Pipeline worker failed");
            minimal_response(500)
        }
        Err(_) => {
            tracing::warn!(
                conn = %log_id,
                timeout_secs = parameters.response_client_timeout_secs,
                "Pipeline did not finish in time"
            );
            minimal_response(500)
        }
    };
    Ok(response)
}

/// Detach the request from hyper. Fails with a status code.
async fn convert(
    request: hyper::Request<Incoming>,
    body_limit: usize,
    received_at_ms: u64,
) -> Result<HttpRequest, u16> {
    let (parts, body) = request.into_parts();

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    let body = collect_body(body, body_limit).await?;

    Ok(HttpRequest {
        operation: Some(parts.method.as_str().to_string()),
        url: Some(
            parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        ),
        headers,
        body,
        received_at_ms,
    })
}

/// Read the whole body. Over `limit` is 413, any other body failure is 400.
async fn collect_body<B>(body: B, limit: usize) -> Result<Bytes, u16>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            tracing::debug!(limit, "Request body too large");
            Err(413)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Request body could not be read");
            Err(400)
        }
    }
}

/// Pick the domain for `request`. Fails with a status code.
fn route(server: &ServerContext, request: &HttpRequest, info: &ConnectionInfo) -> Result<Arc<Domain>, u16> {
    if request.path().is_some_and(is_admin_path) {
        return Ok(Arc::clone(server.admin_domain()));
    }

    let host = request
        .host()
        .or_else(|| {
            let fallback = server.parameters().default_domain.clone();
            (!fallback.is_empty()).then_some(fallback)
        })
        .unwrap_or_default();

    let Some(domain) = server.domains().resolve_host(&host) else {
        server.telemetry().nof_unknown_domain.increment();
        tracing::info!(conn = %info.log_id(), host = %host, "Request for unknown domain");
        return Err(404);
    };

    if !domain.is_enabled() {
        tracing::info!(conn = %info.log_id(), domain = %domain.name(), "Request for disabled domain");
        return Err(503);
    }
    Ok(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connection_info, TestServer};
    use hyper::body::Frame;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Yields one chunk, then fails like a reset connection.
    struct BrokenBody {
        sent: bool,
    }

    impl Body for BrokenBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
            if self.sent {
                return Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset by peer",
                ))));
            }
            self.sent = true;
            Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"a=1")))))
        }
    }

    #[tokio::test]
    async fn body_over_limit_is_413() {
        let body = Full::new(Bytes::from(vec![b'x'; 64]));
        assert_eq!(collect_body(body, 16).await, Err(413));

        let body = Full::new(Bytes::from_static(b"a=1&b=2"));
        assert_eq!(collect_body(body, 16).await, Ok(Bytes::from_static(b"a=1&b=2")));
    }

    #[tokio::test]
    async fn broken_body_is_400() {
        assert_eq!(collect_body(BrokenBody { sent: false }, 1024).await, Err(400));
    }

    #[test]
    fn admin_prefix_wins_over_host() {
        let t = TestServer::new();
        let request = HttpRequest::new("GET", "/serveradmin/index.html").with_header("Host", "test.example");
        let domain = route(&t.server, &request, &connection_info()).unwrap();
        assert!(Arc::ptr_eq(&domain, t.server.admin_domain()));
    }

    #[test]
    fn unknown_host_is_404_and_counted() {
        let t = TestServer::new();
        let request = HttpRequest::new("GET", "/").with_header("Host", "nobody.example");
        assert_eq!(route(&t.server, &request, &connection_info()).unwrap_err(), 404);
        assert_eq!(t.server.telemetry().nof_unknown_domain.value(), 1);
    }

    #[test]
    fn missing_host_uses_default_domain() {
        let t = TestServer::new();
        let request = HttpRequest::new("GET", "/");
        assert_eq!(route(&t.server, &request, &connection_info()).unwrap_err(), 404);

        t.server.set_parameter("default_domain", "test.example").unwrap();
        let domain = route(&t.server, &request, &connection_info()).unwrap();
        assert_eq!(domain.name(), "test.example");
    }

    #[test]
    fn disabled_domain_is_503() {
        let t = TestServer::new();
        t.domain.update(|s| s.enabled = false);
        let request = HttpRequest::new("GET", "/").with_header("Host", "test.example:6678");
        assert_eq!(route(&t.server, &request, &connection_info()).unwrap_err(), 503);
    }
}
