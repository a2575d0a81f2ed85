//! Hosted domains.
//!
//! A [`Domain`] owns its blacklist, session store, telemetry and resolved
//! pipeline. Settings and pipeline sit behind `ArcSwap`, so request workers
//! always see a complete snapshot while the admin interface edits them.

pub mod registry;
pub mod telemetry;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use rustls::sign::CertifiedKey;

use crate::config::DomainConfig;
use crate::pipeline::{Pipeline, ServiceRegistry};
use crate::security::Blacklist;
use crate::session::SessionStore;

pub use registry::DomainRegistry;
pub use telemetry::{DomainTelemetry, ListenerStatus, ServerTelemetry};

/// Distinct paths kept in a domain's 404 log. Further new paths are not logged.
pub const MAX_404_LOG_PATHS: usize = 1000;

/// Editable settings of a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSettings {
    pub name: String,
    pub root: PathBuf,
    pub enabled: bool,
    pub www_included: bool,
    pub session_timeout_secs: u64,
    pub services: Vec<String>,
    pub certificate_dir: Option<PathBuf>,
    pub four04_log_enabled: bool,
}

#[derive(Debug)]
pub struct Domain {
    settings: ArcSwap<DomainSettings>,
    settings_writer: Mutex<()>,
    pipeline: ArcSwap<Pipeline>,
    blacklist: Blacklist,
    sessions: SessionStore,
    telemetry: DomainTelemetry,
    certificate: ArcSwapOption<CertifiedKey>,
    four04_log: Mutex<BTreeMap<String, u64>>,
}

impl Domain {
    /// Build a domain. Its pipeline stays empty until [`Domain::rebuild_pipeline`].
    pub fn from_config(config: &DomainConfig) -> Self {
        Self {
            settings: ArcSwap::from_pointee(DomainSettings {
                name: config.name.trim().to_lowercase(),
                root: config.root.clone(),
                enabled: config.enabled,
                www_included: config.www_included,
                session_timeout_secs: config.session_timeout_secs,
                services: config.services.clone(),
                certificate_dir: config.certificate_dir.clone(),
                four04_log_enabled: config.four04_log_enabled,
            }),
            settings_writer: Mutex::new(()),
            pipeline: ArcSwap::from_pointee(Pipeline::default()),
            blacklist: Blacklist::from_entries(&config.blacklist),
            sessions: SessionStore::new(),
            telemetry: DomainTelemetry::new(),
            certificate: ArcSwapOption::empty(),
            four04_log: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn settings(&self) -> Arc<DomainSettings> {
        self.settings.load_full()
    }

    /// Apply `edit` to a copy of the settings and publish it.
    pub fn update(&self, edit: impl FnOnce(&mut DomainSettings)) {
        let _writer = self.settings_writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = DomainSettings::clone(&self.settings.load());
        edit(&mut next);
        self.settings.store(Arc::new(next));
    }

    pub fn name(&self) -> String {
        self.settings.load().name.clone()
    }

    pub fn root(&self) -> PathBuf {
        self.settings.load().root.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.load().enabled
    }

    /// Zero disables session support for this domain.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.load().session_timeout_secs)
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn telemetry(&self) -> &DomainTelemetry {
        &self.telemetry
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.load_full()
    }

    /// Resolve the configured service names and swap the new pipeline in.
    pub fn rebuild_pipeline(&self, registry: &ServiceRegistry) {
        let settings = self.settings();
        let pipeline = Pipeline::resolve(&settings.services, registry);
        tracing::debug!(domain = %settings.name, services = ?pipeline.names(), "Pipeline rebuilt");
        self.pipeline.store(Arc::new(pipeline));
    }

    pub fn certificate(&self) -> Option<Arc<CertifiedKey>> {
        self.certificate.load_full()
    }

    pub fn set_certificate(&self, certificate: Option<Arc<CertifiedKey>>) {
        self.certificate.store(certificate);
    }

    /// Count a 404 for `path` when the 404 log is enabled.
    pub fn record_404(&self, path: &str) {
        if !self.settings.load().four04_log_enabled {
            return;
        }
        let mut log = self.four04_log.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = log.get_mut(path) {
            *count += 1;
        } else if log.len() < MAX_404_LOG_PATHS {
            log.insert(path.to_string(), 1);
        } else {
            tracing::debug!(domain = %self.name(), path, "404 log full");
        }
    }

    /// Logged 404 paths with their hit counts, sorted by path.
    pub fn four04_log(&self) -> Vec<(String, u64)> {
        let log = self.four04_log.lock().unwrap_or_else(PoisonError::into_inner);
        log.iter().map(|(path, count)| (path.clone(), *count)).collect()
    }

    pub fn clear_404_log(&self) {
        self.four04_log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Current state as configuration, for saving.
    pub fn to_config(&self) -> DomainConfig {
        let settings = self.settings();
        DomainConfig {
            name: settings.name.clone(),
            root: settings.root.clone(),
            enabled: settings.enabled,
            www_included: settings.www_included,
            session_timeout_secs: settings.session_timeout_secs,
            services: settings.services.clone(),
            certificate_dir: settings.certificate_dir.clone(),
            four04_log_enabled: settings.four04_log_enabled,
            blacklist: self.blacklist.entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Action;

    fn config() -> DomainConfig {
        let mut config = DomainConfig {
            name: "Example.com".into(),
            root: "/srv/example".into(),
            ..DomainConfig::default()
        };
        config.blacklist.insert("10.0.0.9".into(), Action::Send401Unauthorized);
        config
    }

    #[test]
    fn from_config_normalizes_name() {
        let domain = Domain::from_config(&config());
        assert_eq!(domain.name(), "example.com");
        assert_eq!(domain.blacklist().action("10.0.0.9"), Some(Action::Send401Unauthorized));
        assert!(domain.pipeline().is_empty());
    }

    #[test]
    fn service_edit_needs_explicit_rebuild() {
        let domain = Domain::from_config(&config());
        let registry = ServiceRegistry::standard();
        domain.rebuild_pipeline(&registry);
        assert_eq!(domain.pipeline().len(), 6);

        let before = domain.pipeline();
        domain.update(|s| s.services = vec!["only-get-or-post".into()]);
        assert_eq!(domain.pipeline().len(), 6);

        domain.rebuild_pipeline(&registry);
        assert_eq!(domain.pipeline().names(), vec!["only-get-or-post"]);
        assert_eq!(before.len(), 6);
    }

    #[test]
    fn four04_log_counts_only_when_enabled() {
        let domain = Domain::from_config(&config());
        domain.record_404("/missing.html");
        assert!(domain.four04_log().is_empty());

        domain.update(|s| s.four04_log_enabled = true);
        domain.record_404("/missing.html");
        domain.record_404("/gone");
        domain.record_404("/missing.html");
        assert_eq!(
            domain.four04_log(),
            vec![("/gone".to_string(), 1), ("/missing.html".to_string(), 2)]
        );

        domain.clear_404_log();
        assert!(domain.four04_log().is_empty());
    }

    #[test]
    fn four04_log_is_bounded() {
        let domain = Domain::from_config(&DomainConfig {
            four04_log_enabled: true,
            ..config()
        });
        for i in 0..MAX_404_LOG_PATHS + 10 {
            domain.record_404(&format!("/p{}", i));
        }
        domain.record_404("/p0");

        let log = domain.four04_log();
        assert_eq!(log.len(), MAX_404_LOG_PATHS);
        assert!(log.contains(&("/p0".to_string(), 2)));
        assert!(!log.iter().any(|(path, _)| path == &format!("/p{}", MAX_404_LOG_PATHS)));
    }

    #[test]
    fn to_config_reflects_edits() {
        let domain = Domain::from_config(&config());
        domain.update(|s| {
            s.enabled = false;
            s.four04_log_enabled = true;
        });
        domain.blacklist().remove("10.0.0.9");

        let saved = domain.to_config();
        assert!(!saved.enabled);
        assert!(saved.four04_log_enabled);
        assert!(saved.blacklist.is_empty());
        assert_eq!(saved.name, "example.com");
    }
}
