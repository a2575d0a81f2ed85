//! Name-keyed domain registry and host resolution.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::Domain;
use crate::pipeline::ServiceRegistry;

/// Error type for registry edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("domain {0} already exists")]
    Exists(String),
    #[error("domain {0} does not exist")]
    Missing(String),
    #[error("domain name must not be empty")]
    EmptyName,
}

#[derive(Debug, Default)]
pub struct DomainRegistry {
    domains: DashMap<String, Arc<Domain>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, domain: Arc<Domain>) -> Result<(), RegistryError> {
        let name = domain.name();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        match self.domains.entry(name.clone()) {
            Entry::Occupied(_) => Err(RegistryError::Exists(name)),
            Entry::Vacant(slot) => {
                slot.insert(domain);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Domain>> {
        self.domains
            .get(&name.to_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Domain>> {
        self.domains.remove(&name.to_lowercase()).map(|(_, d)| d)
    }

    /// Change the name (and registry key) of a domain.
    pub fn rename(&self, old: &str, new: &str) -> Result<(), RegistryError> {
        let new = new.trim().to_lowercase();
        if new.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let old = old.to_lowercase();
        if old == new {
            return Ok(());
        }
        if self.domains.contains_key(&new) {
            return Err(RegistryError::Exists(new));
        }
        let (_, domain) = self
            .domains
            .remove(&old)
            .ok_or_else(|| RegistryError::Missing(old.clone()))?;
        domain.update(|s| s.name = new.clone());
        self.domains.insert(new, domain);
        Ok(())
    }

    /// Find the domain serving `host`.
    ///
    /// Exact name first, then `www.<name>` for domains that include it.
    pub fn resolve_host(&self, host: &str) -> Option<Arc<Domain>> {
        let host = host.to_lowercase();
        if let Some(domain) = self.get(&host) {
            return Some(domain);
        }
        let bare = host.strip_prefix("www.")?;
        self.get(bare)
            .filter(|domain| domain.settings().www_included)
    }

    /// All domains sorted by name.
    pub fn all(&self) -> Vec<Arc<Domain>> {
        let mut domains: Vec<_> = self.domains.iter().map(|e| Arc::clone(e.value())).collect();
        domains.sort_by_key(|d| d.name());
        domains
    }

    /// Make `domains` the whole registry.
    ///
    /// Names are validated first. New domains are swapped in under their
    /// names before stale names are dropped, so host resolution of a name
    /// present in both sets never fails mid-replacement.
    pub fn replace_all(&self, domains: Vec<Arc<Domain>>) {
        let mut next: HashMap<String, Arc<Domain>> = HashMap::with_capacity(domains.len());
        for domain in domains {
            let name = domain.name();
            if name.is_empty() {
                tracing::warn!(error = %RegistryError::EmptyName, "Domain skipped");
                continue;
            }
            if next.contains_key(&name) {
                tracing::warn!(error = %RegistryError::Exists(name), "Domain skipped");
                continue;
            }
            next.insert(name, domain);
        }

        for (name, domain) in &next {
            self.domains.insert(name.clone(), Arc::clone(domain));
        }
        self.domains.retain(|name, _| next.contains_key(name));
    }

    pub fn rebuild_pipelines(&self, services: &ServiceRegistry) {
        for domain in self.all() {
            domain.rebuild_pipeline(services);
        }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;

    fn domain(name: &str, www: bool) -> Arc<Domain> {
        Arc::new(Domain::from_config(&DomainConfig {
            name: name.into(),
            www_included: www,
            ..DomainConfig::default()
        }))
    }

    #[test]
    fn add_rejects_duplicates() {
        let registry = DomainRegistry::new();
        registry.add(domain("a.com", false)).unwrap();
        assert_eq!(
            registry.add(domain("A.com", false)),
            Err(RegistryError::Exists("a.com".into()))
        );
        assert_eq!(registry.add(domain("", false)), Err(RegistryError::EmptyName));
    }

    #[test]
    fn host_resolution_honors_www_flag() {
        let registry = DomainRegistry::new();
        registry.add(domain("a.com", true)).unwrap();
        registry.add(domain("b.com", false)).unwrap();

        assert!(registry.resolve_host("A.COM").is_some());
        assert!(registry.resolve_host("www.a.com").is_some());
        assert!(registry.resolve_host("www.b.com").is_none());
        assert!(registry.resolve_host("c.com").is_none());
    }

    #[test]
    fn replace_all_swaps_in_place() {
        let registry = Arc::new(DomainRegistry::new());
        registry.add(domain("keep.com", false)).unwrap();
        registry.add(domain("drop.com", false)).unwrap();

        let reader = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || (0..10_000).all(|_| registry.resolve_host("keep.com").is_some()))
        };
        for _ in 0..200 {
            registry.replace_all(vec![
                domain("keep.com", true),
                domain("new.com", false),
                domain("NEW.com", false),
                domain("", false),
            ]);
        }
        assert!(reader.join().unwrap());

        let names: Vec<String> = registry.all().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["keep.com", "new.com"]);
        assert!(registry.get("keep.com").unwrap().settings().www_included);
    }

    #[test]
    fn rename_moves_key() {
        let registry = DomainRegistry::new();
        registry.add(domain("old.com", false)).unwrap();
        registry.add(domain("taken.com", false)).unwrap();

        assert!(registry.rename("old.com", "taken.com").is_err());
        registry.rename("old.com", "New.com").unwrap();
        assert!(registry.get("old.com").is_none());
        assert_eq!(registry.get("new.com").unwrap().name(), "new.com");
        assert_eq!(
            registry.rename("gone.com", "x.com"),
            Err(RegistryError::Missing("gone.com".into()))
        );
    }
}
