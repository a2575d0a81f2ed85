//! Shared server state.
//!
//! One [`ServerContext`] is built at startup and handed as
//! `Arc<ServerContext>` to the accept loops, the connection handlers and
//! every pipeline stage. Values that the admin interface may replace at
//! runtime (parameters, the connection pool) sit behind `ArcSwap`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::admin::accounts::{AccountStore, MemoryAccountStore};
use crate::config::{
    load_config, save_config, ConfigError, DomainConfig, ObservabilityConfig, ParameterError,
    ServerConfig, ServerParameters,
};
use crate::domain::{Domain, DomainRegistry, ServerTelemetry};
use crate::lifecycle::control::{ControlHandle, ControlReceiver};
use crate::net::ConnectionPool;
use crate::pipeline::ServiceRegistry;
use crate::security::Blacklist;
use crate::statistics::{JsonLinesStore, StatisticsChannel, StatisticsError, StatisticsStore};

/// Name of the pseudo-domain serving the admin interface.
pub const ADMIN_DOMAIN_NAME: &str = "serveradmin";

/// Stages of the admin pseudo-domain.
pub const ADMIN_SERVICES: &[&str] = &[
    "get-session",
    "decode-post-form-urlencoded",
    "server-admin",
    "record-outcome",
];

/// Error type for building the context and for configuration round trips.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("cannot start statistics channel: {0}")]
    Statistics(#[from] StatisticsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("server was started without a configuration file")]
    NoConfigPath,
}

/// External stores the server writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub statistics: Arc<dyn StatisticsStore>,
    pub accounts: Arc<dyn AccountStore>,
}

impl Collaborators {
    /// JSON-lines statistics at the configured path and in-memory accounts.
    pub fn from_parameters(parameters: &ServerParameters) -> Self {
        Self {
            statistics: Arc::new(JsonLinesStore::new(&parameters.statistics_file)),
            accounts: Arc::new(MemoryAccountStore::new()),
        }
    }
}

pub struct ServerContext {
    parameters: ArcSwap<ServerParameters>,
    parameters_writer: Mutex<()>,
    observability: ObservabilityConfig,
    blacklist: Blacklist,
    domains: DomainRegistry,
    admin_domain: Arc<Domain>,
    services: ServiceRegistry,
    pool: ArcSwap<ConnectionPool>,
    statistics: StatisticsChannel,
    accounts: Arc<dyn AccountStore>,
    telemetry: ServerTelemetry,
    control: ControlHandle,
    config_path: Option<PathBuf>,
}

impl ServerContext {
    /// Build the context from `config`.
    ///
    /// Domains get their pipelines resolved immediately. The returned
    /// receiver delivers restart and quit requests to the server loop.
    pub fn new(
        config: ServerConfig,
        config_path: Option<PathBuf>,
        collaborators: Collaborators,
    ) -> Result<(Arc<Self>, ControlReceiver), ContextError> {
        let statistics = StatisticsChannel::start(collaborators.statistics)?;
        let (control, receiver) = ControlHandle::channel();
        let services = ServiceRegistry::standard();

        let ServerConfig {
            parameters,
            observability,
            blacklist,
            domains: domain_configs,
        } = config;

        let admin_domain = Arc::new(Domain::from_config(&admin_domain_config(&parameters)));
        admin_domain.rebuild_pipeline(&services);

        let domains = DomainRegistry::new();
        domains.replace_all(build_domains(&domain_configs, &services));

        let pool = ConnectionPool::build(parameters.max_accepted_connections);

        let context = Arc::new(Self {
            parameters: ArcSwap::from_pointee(parameters),
            parameters_writer: Mutex::new(()),
            observability,
            blacklist: Blacklist::from_entries(&blacklist),
            domains,
            admin_domain,
            services,
            pool: ArcSwap::from_pointee(pool),
            statistics,
            accounts: collaborators.accounts,
            telemetry: ServerTelemetry::new(),
            control,
            config_path,
        });
        Ok((context, receiver))
    }

    pub fn parameters(&self) -> Arc<ServerParameters> {
        self.parameters.load_full()
    }

    /// Change one parameter by name. Takes effect for new requests at once;
    /// pool capacity and ports take effect on the next restart.
    pub fn set_parameter(&self, name: &str, value: &str) -> Result<(), ParameterError> {
        let _writer = self.parameters_writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = ServerParameters::clone(&self.parameters.load());
        next.set(name, value)?;
        self.sync_admin_domain(&next);
        self.parameters.store(Arc::new(next));
        Ok(())
    }

    fn replace_parameters(&self, parameters: ServerParameters) {
        let _writer = self.parameters_writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.sync_admin_domain(&parameters);
        self.parameters.store(Arc::new(parameters));
    }

    fn sync_admin_domain(&self, parameters: &ServerParameters) {
        self.admin_domain.update(|s| {
            s.root = PathBuf::from(&parameters.admin_site_root);
            s.session_timeout_secs = parameters.admin_session_timeout_secs;
        });
    }

    pub fn observability(&self) -> &ObservabilityConfig {
        &self.observability
    }

    /// Server-wide blacklist.
    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn domains(&self) -> &DomainRegistry {
        &self.domains
    }

    pub fn admin_domain(&self) -> &Arc<Domain> {
        &self.admin_domain
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn pool(&self) -> Arc<ConnectionPool> {
        self.pool.load_full()
    }

    /// Replace the pool with a fresh one of the configured capacity.
    ///
    /// Only valid while both listeners are stopped. Leases of the old pool
    /// stay valid and simply never return to it.
    pub fn rebuild_pool(&self) {
        let capacity = self.parameters().max_accepted_connections;
        self.pool.store(Arc::new(ConnectionPool::build(capacity)));
        tracing::info!(capacity, "Connection pool rebuilt");
    }

    /// Re-resolve the pipelines of every domain, the admin domain included.
    pub fn rebuild_pipelines(&self) {
        self.domains.rebuild_pipelines(&self.services);
        self.admin_domain.rebuild_pipeline(&self.services);
    }

    pub fn statistics(&self) -> &StatisticsChannel {
        &self.statistics
    }

    pub fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    pub fn telemetry(&self) -> &ServerTelemetry {
        &self.telemetry
    }

    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Build a domain and resolve its pipeline.
    pub fn build_domain(&self, config: &DomainConfig) -> Arc<Domain> {
        let domain = Arc::new(Domain::from_config(config));
        domain.rebuild_pipeline(&self.services);
        domain
    }

    /// Root directory given to a domain created through the admin interface.
    pub fn new_domain_root(&self, name: &str) -> PathBuf {
        self.parameters().domains_dir.join(name)
    }

    /// The running configuration.
    pub fn snapshot(&self) -> ServerConfig {
        ServerConfig {
            parameters: ServerParameters::clone(&self.parameters()),
            observability: self.observability.clone(),
            blacklist: self.blacklist.entries(),
            domains: self.domains.all().iter().map(|d| d.to_config()).collect(),
        }
    }

    /// Write the running configuration back to the file it came from.
    pub fn save_configuration(&self) -> Result<(), ContextError> {
        let path = self.config_path.as_deref().ok_or(ContextError::NoConfigPath)?;
        save_config(path, &self.snapshot())?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    fn read_configuration(&self) -> Result<ServerConfig, ContextError> {
        let path = self.config_path.as_deref().ok_or(ContextError::NoConfigPath)?;
        Ok(load_config(path)?)
    }

    /// Replace the parameters with those in the configuration file.
    pub fn reload_parameters(&self) -> Result<(), ContextError> {
        let config = self.read_configuration()?;
        self.replace_parameters(config.parameters);
        tracing::info!("Parameters reloaded");
        Ok(())
    }

    /// Replace the domains with those in the configuration file.
    ///
    /// Sessions and telemetry of the old domain objects are discarded.
    pub fn reload_domains(&self) -> Result<(), ContextError> {
        let config = self.read_configuration()?;
        self.domains
            .replace_all(build_domains(&config.domains, &self.services));
        tracing::info!(domains = self.domains.len(), "Domains reloaded");
        Ok(())
    }

    /// Replace the server blacklist with the one in the configuration file.
    pub fn reload_blacklist(&self) -> Result<(), ContextError> {
        let config = self.read_configuration()?;
        self.blacklist.replace_all(&config.blacklist);
        Ok(())
    }
}

fn admin_domain_config(parameters: &ServerParameters) -> DomainConfig {
    DomainConfig {
        name: ADMIN_DOMAIN_NAME.to_string(),
        root: PathBuf::from(&parameters.admin_site_root),
        session_timeout_secs: parameters.admin_session_timeout_secs,
        services: ADMIN_SERVICES.iter().map(|s| s.to_string()).collect(),
        ..DomainConfig::default()
    }
}

fn build_domains(configs: &[DomainConfig], services: &ServiceRegistry) -> Vec<Arc<Domain>> {
    configs
        .iter()
        .map(|config| {
            let domain = Arc::new(Domain::from_config(config));
            domain.rebuild_pipeline(services);
            domain
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Action;
    use crate::testing::RecordingStore;

    fn collaborators() -> Collaborators {
        Collaborators {
            statistics: Arc::new(RecordingStore::new()),
            accounts: Arc::new(MemoryAccountStore::new()),
        }
    }

    fn config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.domains.push(DomainConfig {
            name: "a.com".into(),
            root: "/srv/a".into(),
            ..DomainConfig::default()
        });
        config.blacklist.insert("10.1.1.1".into(), Action::CloseConnection);
        config
    }

    #[test]
    fn builds_domains_with_pipelines() {
        let (ctx, _rx) = ServerContext::new(config(), None, collaborators()).unwrap();
        let domain = ctx.domains().get("a.com").unwrap();
        assert_eq!(domain.pipeline().len(), 6);
        assert_eq!(
            ctx.admin_domain().pipeline().names(),
            vec!["get-session", "decode-post-form-urlencoded", "server-admin", "record-outcome"]
        );
        assert_eq!(ctx.pool().capacity(), 20);
        assert_eq!(ctx.blacklist().action("10.1.1.1"), Some(Action::CloseConnection));
    }

    #[test]
    fn admin_parameters_follow_into_admin_domain() {
        let (ctx, _rx) = ServerContext::new(config(), None, collaborators()).unwrap();
        ctx.set_parameter("admin_site_root", "/srv/admin").unwrap();
        ctx.set_parameter("admin_session_timeout_secs", "42").unwrap();
        assert_eq!(ctx.admin_domain().root(), PathBuf::from("/srv/admin"));
        assert_eq!(ctx.admin_domain().settings().session_timeout_secs, 42);

        assert!(ctx.set_parameter("nope", "1").is_err());
        assert!(ctx.set_parameter("http_port", "x").is_err());
    }

    #[test]
    fn pool_rebuild_uses_new_capacity() {
        let (ctx, _rx) = ServerContext::new(config(), None, collaborators()).unwrap();
        ctx.set_parameter("max_accepted_connections", "3").unwrap();
        assert_eq!(ctx.pool().capacity(), 20);
        ctx.rebuild_pool();
        assert_eq!(ctx.pool().capacity(), 3);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        let (ctx, _rx) = ServerContext::new(config(), Some(path.clone()), collaborators()).unwrap();

        ctx.domains().get("a.com").unwrap().update(|s| s.enabled = false);
        ctx.blacklist().add("10.2.2.2", Action::Send503ServiceUnavailable);
        ctx.save_configuration().unwrap();

        ctx.domains().remove("a.com");
        ctx.blacklist().remove("10.2.2.2");
        ctx.reload_domains().unwrap();
        ctx.reload_blacklist().unwrap();

        assert!(!ctx.domains().get("a.com").unwrap().is_enabled());
        assert_eq!(
            ctx.blacklist().action("10.2.2.2"),
            Some(Action::Send503ServiceUnavailable)
        );
    }

    #[test]
    fn save_without_path_fails() {
        let (ctx, _rx) = ServerContext::new(config(), None, collaborators()).unwrap();
        assert!(matches!(ctx.save_configuration(), Err(ContextError::NoConfigPath)));
    }
}
