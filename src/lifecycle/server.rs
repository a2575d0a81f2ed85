//! Listener state machine.
//!
//! ```text
//! NotRunning ──start──▶ Starting ──bound──▶ Running
//!     ▲                    │                   │
//!     │                  error               stop
//!     │                    ▼                   ▼
//!     └──────drained─── Error / Stopping ◀─────┘
//!
//! HTTPS without any usable certificate: NoCertificate
//! ```
//!
//! Restart stops both listeners, rebuilds the connection pool and every
//! domain pipeline when both stopped cleanly, then starts HTTP and, given a
//! certificate, HTTPS again.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::context::ServerContext;
use crate::domain::ListenerStatus;
use crate::lifecycle::control::{ControlCommand, ControlReceiver};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError, ACCEPT_TIMEOUT};
use crate::net::tls::CertificateSelector;
use crate::net::Transport;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("HTTP listener failed to start: {0}")]
    Http(#[source] ListenerError),
}

/// A listener that is accepting.
struct RunningListener {
    transport: Transport,
    local_addr: SocketAddr,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    task: JoinHandle<()>,
}

/// Owns both listeners and the background session sweep.
pub struct Server {
    context: Arc<ServerContext>,
    control: ControlReceiver,
    http: Option<RunningListener>,
    https: Option<RunningListener>,
    sweeper: Option<(Shutdown, JoinHandle<()>)>,
}

impl Server {
    pub fn new(context: Arc<ServerContext>, control: ControlReceiver) -> Self {
        Self {
            context,
            control,
            http: None,
            https: None,
            sweeper: None,
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Bound HTTP address while the listener runs.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().map(|l| l.local_addr)
    }

    /// Bound HTTPS address while the listener runs.
    pub fn https_addr(&self) -> Option<SocketAddr> {
        self.https.as_ref().map(|l| l.local_addr)
    }

    /// Start both listeners.
    ///
    /// Only an HTTP failure is an error. HTTPS problems are logged and shown
    /// in the listener status.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        self.start_http().await.map_err(ServerError::Http)?;
        self.start_https().await;
        Ok(())
    }

    async fn start_http(&mut self) -> Result<(), ListenerError> {
        if self.http.is_some() {
            return Ok(());
        }
        let telemetry = self.context.telemetry();
        telemetry.set_http_status(ListenerStatus::Starting);

        let parameters = self.context.parameters();
        match spawn_listener(&self.context, &parameters.bind_address, parameters.http_port, Transport::Plain, None).await {
            Ok(running) => {
                self.http = Some(running);
                telemetry.set_http_status(ListenerStatus::Running);
                Ok(())
            }
            Err(e) => {
                telemetry.set_http_status(ListenerStatus::Error);
                tracing::error!(error = %e, "HTTP listener not started");
                Err(e)
            }
        }
    }

    async fn start_https(&mut self) {
        if self.https.is_some() {
            return;
        }
        let telemetry = self.context.telemetry();
        telemetry.set_https_status(ListenerStatus::Starting);

        let Some(acceptor) = self.tls_acceptor() else {
            telemetry.set_https_status(ListenerStatus::NoCertificate);
            tracing::warn!("No usable certificate, HTTPS listener not started");
            return;
        };

        let parameters = self.context.parameters();
        match spawn_listener(&self.context, &parameters.bind_address, parameters.https_port, Transport::Tls, Some(acceptor)).await {
            Ok(running) => {
                self.https = Some(running);
                telemetry.set_https_status(ListenerStatus::Running);
            }
            Err(e) => {
                telemetry.set_https_status(ListenerStatus::Error);
                tracing::error!(error = %e, "HTTPS listener not started");
            }
        }
    }

    /// Load certificates, hand each domain its own, and build the acceptor.
    fn tls_acceptor(&self) -> Option<TlsAcceptor> {
        let parameters = self.context.parameters();
        let domains = self.context.domains().all();
        let selector = CertificateSelector::build(
            parameters.certificate_dir.as_deref(),
            domains.iter().filter_map(|domain| {
                let settings = domain.settings();
                settings
                    .certificate_dir
                    .clone()
                    .map(|dir| (settings.name.clone(), dir))
            }),
            SystemTime::now(),
        );

        for domain in &domains {
            domain.set_certificate(selector.domain_certificate(&domain.name()));
        }
        if selector.is_empty() {
            return None;
        }

        match Arc::new(selector).server_config() {
            Ok(config) => Some(TlsAcceptor::from(config)),
            Err(e) => {
                tracing::error!(error = %e, "TLS configuration rejected");
                None
            }
        }
    }

    /// Stop both listeners. True when both drained in time.
    pub async fn stop(&mut self) -> bool {
        let drain = self.context.parameters().listener_drain_timeout();
        let telemetry = self.context.telemetry();

        let http = match self.http.take() {
            Some(running) => {
                telemetry.set_http_status(ListenerStatus::Stopping);
                stop_listener(running, drain).await
            }
            None => true,
        };
        telemetry.set_http_status(ListenerStatus::NotRunning);

        let https = match self.https.take() {
            Some(running) => {
                telemetry.set_https_status(ListenerStatus::Stopping);
                stop_listener(running, drain).await
            }
            None => true,
        };
        telemetry.set_https_status(ListenerStatus::NotRunning);

        http && https
    }

    /// Stop, rebuild when both listeners are confirmed stopped, start again.
    pub async fn restart(&mut self) -> Result<(), ServerError> {
        tracing::info!("Restarting listeners");
        if self.stop().await {
            self.context.rebuild_pool();
            self.context.rebuild_pipelines();
        } else {
            tracing::error!("Listeners did not drain, keeping the current pool and pipelines");
        }
        self.start().await
    }

    /// Start, then serve control commands and Ctrl-C until asked to quit.
    pub async fn run(mut self) -> Result<(), ServerError> {
        self.start().await?;
        self.start_sweeper();

        loop {
            tokio::select! {
                command = self.control.recv() => match command {
                    Some(ControlCommand::Restart) => {
                        if let Err(e) = self.restart().await {
                            tracing::error!(error = %e, "Restart failed");
                        }
                    }
                    Some(ControlCommand::Quit) | None => {
                        tracing::info!("Quit requested");
                        break;
                    }
                },
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
                    }
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        if !self.stop().await {
            tracing::warn!("Connections still open at exit");
        }
        self.stop_sweeper().await;
        tracing::info!("Server stopped");
        Ok(())
    }

    fn start_sweeper(&mut self) {
        let interval_secs = self.context.parameters().session_sweep_interval_secs;
        if interval_secs == 0 || self.sweeper.is_some() {
            return;
        }
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        let context = Arc::clone(&self.context);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = sweep_sessions(&context);
                        if purged > 0 {
                            tracing::debug!(purged, "Expired sessions purged");
                        }
                    }
                    _ = signal.recv() => break,
                }
            }
        });
        self.sweeper = Some((shutdown, task));
    }

    async fn stop_sweeper(&mut self) {
        if let Some((shutdown, task)) = self.sweeper.take() {
            shutdown.trigger();
            let _ = task.await;
        }
    }
}

/// Purge expired sessions of every domain and the admin pseudo-domain.
pub fn sweep_sessions(context: &ServerContext) -> usize {
    let admin = context.admin_domain().sessions().purge_expired();
    context
        .domains()
        .all()
        .iter()
        .map(|domain| domain.sessions().purge_expired())
        .sum::<usize>()
        + admin
}

async fn spawn_listener(
    context: &Arc<ServerContext>,
    address: &str,
    port: u16,
    transport: Transport,
    tls: Option<TlsAcceptor>,
) -> Result<RunningListener, ListenerError> {
    let listener = Listener::bind(address, port, transport, tls).await?;
    let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
    let shutdown = Shutdown::new();
    let tracker = ConnectionTracker::new();
    let task = tokio::spawn(listener.run(Arc::clone(context), shutdown.subscribe(), tracker.clone()));

    Ok(RunningListener {
        transport,
        local_addr,
        shutdown,
        tracker,
        task,
    })
}

/// Signal the accept loop, wait for it, then wait for its connections.
async fn stop_listener(running: RunningListener, drain: Duration) -> bool {
    let listener = running.transport.as_str();
    running.shutdown.trigger();

    let mut task = running.task;
    let accept_stopped = match tokio::time::timeout(ACCEPT_TIMEOUT * 2, &mut task).await {
        Ok(_) => true,
        Err(_) => {
            tracing::error!(listener, "Accept loop did not stop, aborting it");
            task.abort();
            false
        }
    };

    let drained = running.tracker.wait_idle(drain).await;
    if !drained {
        tracing::warn!(
            listener,
            open = running.tracker.active_count(),
            drain_secs = drain.as_secs(),
            "Connections still open after drain timeout"
        );
    }
    tracing::info!(listener, "Listener stopped");
    accept_stopped && drained
}
