//! Test helpers shared by the unit tests.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::admin::accounts::MemoryAccountStore;
use crate::config::{DomainConfig, ServerConfig};
use crate::context::{Collaborators, ServerContext};
use crate::domain::Domain;
use crate::http::HttpRequest;
use crate::lifecycle::control::{ControlHandle, ControlReceiver};
use crate::net::{ConnectionId, ConnectionInfo, Transport};
use crate::pipeline::ServiceContext;
use crate::statistics::{timestamp_ms, Mutation, StatisticsError, StatisticsStore};

/// Statistics store that keeps every mutation in memory.
#[derive(Debug, Default)]
pub struct RecordingStore {
    mutations: Mutex<Vec<Mutation>>,
    changed: Condvar,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations.lock().unwrap().clone()
    }

    /// Block until at least `count` mutations arrived, then return all of them.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Mutation> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.mutations.lock().unwrap();
        while guard.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            assert!(!remaining.is_zero(), "expected {count} mutations, got {}", guard.len());
            guard = self.changed.wait_timeout(guard, remaining).unwrap().0;
        }
        guard.clone()
    }
}

impl StatisticsStore for RecordingStore {
    fn persist(&self, mutation: &Mutation) -> Result<(), StatisticsError> {
        self.mutations.lock().unwrap().push(mutation.clone());
        self.changed.notify_all();
        Ok(())
    }
}

/// A server context with one domain rooted in a temporary directory.
pub struct TestServer {
    pub server: Arc<ServerContext>,
    pub domain: Arc<Domain>,
    pub store: Arc<RecordingStore>,
    pub control: ControlReceiver,
    root: TempDir,
}

impl TestServer {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.domains.push(DomainConfig {
            name: "test.example".into(),
            root: root.path().to_path_buf(),
            ..DomainConfig::default()
        });

        let store = Arc::new(RecordingStore::new());
        let collaborators = Collaborators {
            statistics: Arc::clone(&store) as Arc<dyn StatisticsStore>,
            accounts: Arc::new(MemoryAccountStore::new()),
        };
        let (server, control) = ServerContext::new(config, None, collaborators).unwrap();
        let domain = server.domains().get("test.example").unwrap();

        Self {
            server,
            domain,
            store,
            control,
            root,
        }
    }

    /// Hand the control receiver to a server loop, leaving a detached one behind.
    pub fn take_control(&mut self) -> ControlReceiver {
        std::mem::replace(&mut self.control, ControlHandle::channel().1)
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Context for `request` against the test domain.
    pub fn context(&self, request: HttpRequest) -> ServiceContext {
        self.context_for(Arc::clone(&self.domain), request)
    }

    pub fn context_for(&self, domain: Arc<Domain>, request: HttpRequest) -> ServiceContext {
        ServiceContext::new(request, connection_info(), domain, Arc::clone(&self.server))
    }
}

/// Connection details of a fake client at 127.0.0.1.
pub fn connection_info() -> ConnectionInfo {
    ConnectionInfo {
        object_id: 0,
        allocation_count: 1,
        remote_addr: SocketAddr::from(([127, 0, 0, 1], 50_000)),
        accepted_at: Instant::now(),
        accepted_at_ms: timestamp_ms(),
        transport: Transport::Plain,
        socket: ConnectionId::new(),
    }
}
