//! Request-processing pipeline.
//!
//! # Data Flow
//! ```text
//! HttpRequest + ConnectionInfo + Domain
//!     → ServiceContext (chain info empty, response undecided)
//!     → stage 1 → stage 2 → ... (domain's configured order)
//!     → HttpResponse
//! ```
//!
//! # Rules
//! - A stage that finds `response.code` set does nothing and returns `Continue`,
//!   so bookkeeping stages at the end of the chain still run.
//! - Request-level failures (400, 403, 404, 501) are a response code plus
//!   `Continue`, never `Abort`.
//! - `Abort` is for invariant violations only. The pipeline then forces a 500
//!   and skips the remaining stages.
//! - Stage names are resolved once, when the pipeline is built. The built
//!   pipeline is swapped into the domain atomically.

pub mod chain_info;
pub mod services;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::ServerContext;
use crate::domain::Domain;
use crate::http::{HttpRequest, HttpResponse};
use crate::net::ConnectionInfo;
use crate::observability::metrics;
use crate::session::Session;
use crate::statistics::{timestamp_ms, Mutation, MutationKind};

pub use chain_info::{ChainInfo, ChainKey, ChainValue, FormFields};

/// Result of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Abort,
}

/// One request-processing stage.
pub trait Service: Send + Sync {
    /// Name used in domain service lists.
    fn name(&self) -> &'static str;

    fn process(&self, ctx: &mut ServiceContext) -> Outcome;
}

/// Everything a stage may read or change for one request.
pub struct ServiceContext {
    pub request: HttpRequest,
    pub connection: ConnectionInfo,
    pub domain: Arc<Domain>,
    pub server: Arc<ServerContext>,
    pub info: ChainInfo,
    pub response: HttpResponse,
    recorded: bool,
}

impl ServiceContext {
    pub fn new(
        request: HttpRequest,
        connection: ConnectionInfo,
        domain: Arc<Domain>,
        server: Arc<ServerContext>,
    ) -> Self {
        Self {
            request,
            connection,
            domain,
            server,
            info: ChainInfo::new(),
            response: HttpResponse::new(),
            recorded: false,
        }
    }

    /// A prior stage already set the response code.
    pub fn is_decided(&self) -> bool {
        self.response.is_decided()
    }

    /// The outcome has been counted and submitted.
    pub fn is_recorded(&self) -> bool {
        self.recorded
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.info.session().cloned()
    }

    /// Decide the response with `code` and record it.
    pub fn reject(&mut self, code: u16, details: impl Into<String>) {
        let details = details.into();
        tracing::debug!(
            conn = %self.connection.log_id(),
            domain = %self.domain.name(),
            code,
            details = %details,
            "Request rejected"
        );
        self.response.code = Some(code);
        self.record(code, details, false);
    }

    /// Count `code` in the domain telemetry and submit a mutation for it.
    ///
    /// Only the first call per request has an effect.
    pub fn record(&mut self, code: u16, details: impl Into<String>, completed: bool) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        let domain = self.domain.name();
        self.domain.telemetry().count(code);
        metrics::record_response(&domain, code);

        let mutation = Mutation::new(MutationKind::AddClientRecord, &domain)
            .with_url(self.request.url.as_deref())
            .with_response(code, details)
            .with_connection(
                self.connection.object_id,
                self.connection.allocation_count,
                self.connection.socket.as_u64(),
            )
            .with_client(&self.connection.client_ip(), self.request.do_not_track())
            .with_timestamps(
                Some(self.request.received_at_ms),
                completed.then(timestamp_ms),
            );
        self.server.statistics().submit_logged(mutation);
    }

    fn abort_with_500(&mut self, stage: &str) {
        self.response.code = Some(500);
        self.record(500, format!("Pipeline aborted in {}", stage), true);
    }
}

/// A resolved, ordered list of stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Service>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Service>>) -> Self {
        Self { stages }
    }

    /// Resolve `names` through `registry`. Unknown names are logged and skipped.
    pub fn resolve(names: &[String], registry: &ServiceRegistry) -> Self {
        let stages = names
            .iter()
            .filter_map(|name| {
                let stage = registry.get(name);
                if stage.is_none() {
                    tracing::warn!(service = %name, "Unknown service name, skipped");
                }
                stage
            })
            .collect();
        Self { stages }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order until one aborts.
    pub fn run(&self, ctx: &mut ServiceContext) -> Outcome {
        for stage in &self.stages {
            if stage.process(ctx) == Outcome::Abort {
                tracing::error!(
                    conn = %ctx.connection.log_id(),
                    domain = %ctx.domain.name(),
                    stage = stage.name(),
                    "Pipeline aborted"
                );
                ctx.abort_with_500(stage.name());
                return Outcome::Abort;
            }
        }
        Outcome::Continue
    }
}

/// Name → stage lookup used when building pipelines.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<&'static str, Arc<dyn Service>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.services.keys()).finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in stage.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(services::session::GetSession));
        registry.register(Arc::new(services::method::OnlyGetOrPost));
        registry.register(Arc::new(services::form::DecodePostFormUrlEncoded));
        registry.register(Arc::new(services::resource_path::GetResourcePathFromUrl));
        registry.register(Arc::new(services::file::GetFileAtResourcePath));
        registry.register(Arc::new(services::outcome::RecordOutcome));
        registry.register(Arc::new(crate::admin::ServerAdmin));
        registry
    }

    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.insert(service.name(), service);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.services.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
