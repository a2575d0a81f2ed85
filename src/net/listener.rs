//! TCP listener with pool-bounded admission.
//!
//! # Responsibilities
//! - Bind to the configured address and port
//! - Take a connection slot from the pool before every accept
//! - Apply the server-wide blacklist before anything is read
//! - Hand accepted sockets (after the TLS handshake, for HTTPS) to the
//!   HTTP handler on their own task

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::context::ServerContext;
use crate::http::handler;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::net::connection::{ConnectionLease, ConnectionTracker, Transport};
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;

/// Upper bound on one `accept` call, so a held slot is re-checked regularly.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on a TLS handshake.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// The configured address is not an IP address.
    Address(String),
    /// Failed to bind to address.
    Bind(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Address(address) => write!(f, "Invalid bind address: {}", address),
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// What to do with an accepted socket.
enum Job {
    Serve(ConnectionLease),
    Reject(ConnectionLease, u16),
}

/// A bound listener for one transport.
pub struct Listener {
    inner: TcpListener,
    transport: Transport,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    /// Bind `address:port`. Port 0 picks an ephemeral port.
    pub async fn bind(
        address: &str,
        port: u16,
        transport: Transport,
        tls: Option<TlsAcceptor>,
    ) -> Result<Self, ListenerError> {
        let ip = address
            .trim()
            .parse::<std::net::IpAddr>()
            .map_err(|_| ListenerError::Address(address.to_string()))?;
        let inner = TcpListener::bind(SocketAddr::new(ip, port))
            .await
            .map_err(ListenerError::Bind)?;

        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %local_addr, listener = transport.as_str(), "Listener bound");

        Ok(Self { inner, transport, tls })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Accept until `shutdown` fires.
    ///
    /// Every live connection task holds a guard from `tracker`, so the caller
    /// can wait for them after this returns.
    pub async fn run(self, server: Arc<ServerContext>, mut shutdown: ShutdownSignal, tracker: ConnectionTracker) {
        let listener = self.transport.as_str();
        let mut accept_errors = Backoff::new(Duration::from_millis(10), Duration::from_secs(1));

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let pool = server.pool();
            let max_wait = server.parameters().max_wait_for_pending_connections();
            let Some(lease) = pool.acquire_wait(max_wait, &mut shutdown).await else {
                break;
            };

            let accepted = tokio::select! {
                result = tokio::time::timeout(ACCEPT_TIMEOUT, self.inner.accept()) => result,
                _ = shutdown.recv() => break,
            };
            let (stream, remote) = match accepted {
                Err(_) => continue,
                Ok(Err(e)) => {
                    let delay = accept_errors.next_delay();
                    tracing::warn!(listener, error = %e, retry_ms = delay.as_millis() as u64, "Accept failed");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Ok(Ok(accepted)) => accepted,
            };
            accept_errors.reset();

            server.telemetry().nof_accepted_connections.increment();
            metrics::record_accepted(listener);

            let client = remote.ip().to_string();
            let job = match server.blacklist().action(&client) {
                None => Job::Serve(lease),
                Some(action) => {
                    server.telemetry().nof_blacklisted_accesses.increment();
                    metrics::record_blacklist_rejection("server", action.as_str());
                    tracing::info!(listener, client = %client, action = %action, "Blacklisted client rejected");
                    match action.status_code() {
                        Some(code) => Job::Reject(lease, code),
                        None => {
                            drop(stream);
                            continue;
                        }
                    }
                }
            };

            let info = match &job {
                Job::Serve(lease) | Job::Reject(lease, _) => lease.attach(remote, self.transport),
            };
            tracing::debug!(conn = %info.log_id(), socket = %info.socket, peer = %remote, listener, "Connection accepted");

            let guard = tracker.track(info.socket);
            let tls = self.tls.clone();
            let server = Arc::clone(&server);
            let signal = shutdown.clone();
            tokio::spawn(async move {
                let _guard = guard;
                match tls {
                    Some(acceptor) => {
                        match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                            Ok(Ok(stream)) => dispatch(stream, job, server, signal).await,
                            Ok(Err(e)) => tracing::debug!(peer = %remote, error = %e, "TLS handshake failed"),
                            Err(_) => tracing::debug!(peer = %remote, "TLS handshake timed out"),
                        }
                    }
                    None => dispatch(stream, job, server, signal).await,
                }
            });
        }

        tracing::info!(listener, "Accept loop stopped");
    }
}

async fn dispatch<S>(stream: S, job: Job, server: Arc<ServerContext>, shutdown: ShutdownSignal)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    match job {
        Job::Serve(lease) => {
            let Some(info) = lease.info() else {
                tracing::error!(object_id = lease.object_id(), "Connection slot lost its attachment");
                return;
            };
            handler::serve_connection(stream, info, server, shutdown).await;
            drop(lease);
        }
        Job::Reject(lease, code) => {
            let timeout = server.parameters().keep_alive_timeout();
            handler::serve_rejection(stream, code, timeout).await;
            drop(lease);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::shutdown::Shutdown;
    use crate::security::Action;
    use crate::testing::TestServer;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start(t: &TestServer) -> (SocketAddr, Shutdown, ConnectionTracker, tokio::task::JoinHandle<()>) {
        let listener = Listener::bind("127.0.0.1", 0, Transport::Plain, None).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let task = tokio::spawn(listener.run(Arc::clone(&t.server), shutdown.subscribe(), tracker.clone()));
        (addr, shutdown, tracker, task)
    }

    async fn exchange(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
        String::from_utf8_lossy(&response).into_owned()
    }

    #[test]
    fn bad_address_is_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = runtime.block_on(Listener::bind("not-an-ip", 0, Transport::Plain, None));
        assert!(matches!(result, Err(ListenerError::Address(_))));
    }

    #[tokio::test]
    async fn serves_file_and_counts_accept() {
        let t = TestServer::new();
        std::fs::write(t.root().join("index.html"), "hello").unwrap();
        let (addr, shutdown, tracker, task) = start(&t).await;

        let response = exchange(
            addr,
            "GET / HTTP/1.1\r\nHost: test.example\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("hello"));
        assert_eq!(t.server.telemetry().nof_accepted_connections.value(), 1);

        shutdown.trigger();
        task.await.unwrap();
        assert!(tracker.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(t.server.pool().allocated(), 0);
    }

    #[tokio::test]
    async fn server_blacklist_close_drops_socket() {
        let t = TestServer::new();
        t.server.blacklist().add("127.0.0.1", Action::CloseConnection);
        let (addr, shutdown, _tracker, task) = start(&t).await;

        let response = exchange(addr, "GET / HTTP/1.1\r\nHost: test.example\r\n\r\n").await;
        assert!(response.is_empty());
        assert_eq!(t.server.telemetry().nof_blacklisted_accesses.value(), 1);

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn server_blacklist_wins_over_domain_blacklist() {
        let t = TestServer::new();
        std::fs::write(t.root().join("index.html"), "hello").unwrap();
        t.server.blacklist().add("127.0.0.1", Action::CloseConnection);
        t.domain.blacklist().add("127.0.0.1", Action::Send401Unauthorized);
        let (addr, shutdown, _tracker, task) = start(&t).await;

        let response = exchange(addr, "GET / HTTP/1.1\r\nHost: test.example\r\n\r\n").await;
        assert!(response.is_empty(), "{response}");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(t.server.telemetry().nof_blacklisted_accesses.value(), 1);
        let domain = t.domain.telemetry();
        assert_eq!(domain.nof_blacklisted_accesses.value(), 0);
        assert!(domain.entries().iter().all(|(_, counter)| counter.value() == 0));
        assert!(t.store.mutations().is_empty());
        assert!(t.domain.sessions().is_empty());

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn server_blacklist_503_answers_minimal() {
        let t = TestServer::new();
        t.server.blacklist().add("127.0.0.1", Action::Send503ServiceUnavailable);
        let (addr, shutdown, _tracker, task) = start(&t).await;

        let response = exchange(addr, "GET / HTTP/1.1\r\nHost: test.example\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 503"), "{response}");
        assert_eq!(t.domain.telemetry().nof_200.value(), 0);

        shutdown.trigger();
        task.await.unwrap();
    }
}
