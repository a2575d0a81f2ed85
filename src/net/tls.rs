//! TLS certificate loading and per-domain selection.
//!
//! A certificate directory holds exactly one `*.pem` file whose name contains
//! `cert` and exactly one whose name contains `key`. Anything else about the
//! material (missing files, several candidates, a key that does not match, a
//! certificate outside its validity window) is reported as a
//! [`CertificateError`] and disables only the affected entry.

use std::collections::HashMap;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rustls::crypto::ring::default_provider;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{InconsistentKeys, ServerConfig};

/// Error type for certificate loading.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("cannot read certificate directory {dir}: {source}")]
    Directory {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("expected exactly one certificate file in {dir}, found {found}")]
    CertificateFileCount { dir: PathBuf, found: usize },
    #[error("expected exactly one private key file in {dir}, found {found}")]
    KeyFileCount { dir: PathBuf, found: usize },
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("private key does not match the certificate")]
    KeyMismatch,
    #[error("cannot parse certificate: {0}")]
    Parse(String),
    #[error("certificate is not valid before {not_before}")]
    NotYetValid { not_before: String },
    #[error("certificate expired at {not_after}")]
    Expired { not_after: String },
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Find the certificate and key files in `dir`.
pub fn locate_pem_files(dir: &Path) -> Result<(PathBuf, PathBuf), CertificateError> {
    let entries = fs::read_dir(dir).map_err(|source| CertificateError::Directory {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut certs = Vec::new();
    let mut keys = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pem") {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.contains("cert") {
            certs.push(path.clone());
        }
        if name.contains("key") {
            keys.push(path);
        }
    }

    if certs.len() != 1 {
        return Err(CertificateError::CertificateFileCount {
            dir: dir.to_path_buf(),
            found: certs.len(),
        });
    }
    if keys.len() != 1 {
        return Err(CertificateError::KeyFileCount {
            dir: dir.to_path_buf(),
            found: keys.len(),
        });
    }
    Ok((certs.remove(0), keys.remove(0)))
}

fn open(path: &Path) -> Result<BufReader<fs::File>, CertificateError> {
    fs::File::open(path)
        .map(BufReader::new)
        .map_err(|source| CertificateError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Load and validate the certificate material in `dir` as of `now`.
pub fn load_certified_key(dir: &Path, now: SystemTime) -> Result<Arc<CertifiedKey>, CertificateError> {
    let (cert_path, key_path) = locate_pem_files(dir)?;

    let chain = rustls_pemfile::certs(&mut open(&cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CertificateError::Read {
            path: cert_path.clone(),
            source,
        })?;
    let leaf = chain
        .first()
        .ok_or_else(|| CertificateError::NoCertificate(cert_path.clone()))?;
    check_validity(leaf, now)?;

    let key_der = rustls_pemfile::private_key(&mut open(&key_path)?)
        .map_err(|source| CertificateError::Read {
            path: key_path.clone(),
            source,
        })?
        .ok_or_else(|| CertificateError::NoPrivateKey(key_path.clone()))?;
    let signing_key = default_provider().key_provider.load_private_key(key_der)?;

    let certified = CertifiedKey::new(chain, signing_key);
    match certified.keys_match() {
        Ok(()) => {}
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::KeyMismatch)) => {
            return Err(CertificateError::KeyMismatch)
        }
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => {
            tracing::debug!(dir = %dir.display(), "Key type cannot be matched against certificate, accepting");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Arc::new(certified))
}

/// Check that `now` lies within the certificate's validity window.
pub fn check_validity(cert: &CertificateDer<'_>, now: SystemTime) -> Result<(), CertificateError> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| CertificateError::Parse(e.to_string()))?;
    let validity = parsed.validity();

    let now_secs = match now.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    if now_secs < validity.not_before.timestamp() {
        return Err(CertificateError::NotYetValid {
            not_before: validity.not_before.to_string(),
        });
    }
    if now_secs > validity.not_after.timestamp() {
        return Err(CertificateError::Expired {
            not_after: validity.not_after.to_string(),
        });
    }
    Ok(())
}

/// Chooses the certificate for a TLS handshake by SNI name.
///
/// Domains with their own certificate are matched by name. Every other
/// handshake gets the default certificate: the server-level one when it
/// loaded, else the first domain certificate by name.
#[derive(Debug, Default)]
pub struct CertificateSelector {
    default: Option<Arc<CertifiedKey>>,
    by_name: HashMap<String, Arc<CertifiedKey>>,
}

impl CertificateSelector {
    /// Load the server certificate and every domain certificate.
    ///
    /// `domains` yields (host name, certificate directory) pairs. Failures are
    /// logged and leave the entry out.
    pub fn build<I>(server_dir: Option<&Path>, domains: I, now: SystemTime) -> Self
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        let server = server_dir.and_then(|dir| match load_certified_key(dir, now) {
            Ok(key) => {
                tracing::info!(dir = %dir.display(), "Server certificate loaded");
                Some(key)
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Server certificate unusable");
                None
            }
        });

        let mut loaded: HashMap<PathBuf, Option<Arc<CertifiedKey>>> = HashMap::new();
        let mut by_name = HashMap::new();
        for (name, dir) in domains {
            let key = loaded
                .entry(dir.clone())
                .or_insert_with(|| match load_certified_key(&dir, now) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        tracing::warn!(domain = %name, dir = %dir.display(), error = %e, "Domain certificate unusable");
                        None
                    }
                })
                .clone();
            if let Some(key) = key {
                tracing::info!(domain = %name, "Domain certificate loaded");
                by_name.insert(name.to_lowercase(), key);
            }
        }

        let default = server.or_else(|| {
            let mut names: Vec<&String> = by_name.keys().collect();
            names.sort();
            names.first().and_then(|name| by_name.get(*name)).cloned()
        });

        Self { default, by_name }
    }

    /// True when no certificate at all is available.
    pub fn is_empty(&self) -> bool {
        self.default.is_none()
    }

    /// The certificate registered for `name`, without falling back.
    pub fn domain_certificate(&self, name: &str) -> Option<Arc<CertifiedKey>> {
        self.by_name.get(&name.to_lowercase()).cloned()
    }

    /// Certificate for a handshake that asked for `server_name`.
    pub fn select(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        server_name
            .and_then(|name| self.domain_certificate(name))
            .or_else(|| self.default.clone())
    }

    /// Build a rustls server configuration that resolves through this selector.
    pub fn server_config(self: Arc<Self>) -> Result<Arc<ServerConfig>, CertificateError> {
        let mut config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(self);
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }
}

impl ResolvesServerCert for CertificateSelector {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.select(client_hello.server_name())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};
    use std::time::Duration;

    pub(crate) fn write_self_signed(dir: &Path, host: &str) {
        let generated = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
        fs::write(dir.join("cert.pem"), generated.cert.pem()).unwrap();
        fs::write(dir.join("key.pem"), generated.key_pair.serialize_pem()).unwrap();
    }

    #[test]
    fn loads_matching_pair() {
        let dir = tempfile::tempdir().unwrap();
        write_self_signed(dir.path(), "localhost");
        assert!(load_certified_key(dir.path(), SystemTime::now()).is_ok());
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_certified_key(dir.path(), SystemTime::now()).unwrap_err();
        assert!(matches!(err, CertificateError::CertificateFileCount { found: 0, .. }));
    }

    #[test]
    fn multiple_certificate_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_self_signed(dir.path(), "localhost");
        fs::copy(dir.path().join("cert.pem"), dir.path().join("cert-old.pem")).unwrap();
        let err = load_certified_key(dir.path(), SystemTime::now()).unwrap_err();
        assert!(matches!(err, CertificateError::CertificateFileCount { found: 2, .. }));
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_self_signed(dir.path(), "localhost");
        let other = KeyPair::generate().unwrap();
        fs::write(dir.path().join("key.pem"), other.serialize_pem()).unwrap();

        let err = load_certified_key(dir.path(), SystemTime::now()).unwrap_err();
        assert!(matches!(err, CertificateError::KeyMismatch));
    }

    #[test]
    fn validity_window_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.not_before = rcgen::date_time_ymd(2000, 1, 1);
        params.not_after = rcgen::date_time_ymd(2001, 1, 1);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        fs::write(dir.path().join("server-cert.pem"), cert.pem()).unwrap();
        fs::write(dir.path().join("server-key.pem"), key.serialize_pem()).unwrap();

        let err = load_certified_key(dir.path(), SystemTime::now()).unwrap_err();
        assert!(matches!(err, CertificateError::Expired { .. }));

        let before = UNIX_EPOCH + Duration::from_secs(60 * 60 * 24 * 365 * 20);
        let err = load_certified_key(dir.path(), before).unwrap_err();
        assert!(matches!(err, CertificateError::NotYetValid { .. }));

        let inside = UNIX_EPOCH + Duration::from_secs(60 * 60 * 24 * (365 * 30 + 200));
        assert!(load_certified_key(dir.path(), inside).is_ok());
    }

    #[test]
    fn selector_prefers_domain_certificate() {
        let server_dir = tempfile::tempdir().unwrap();
        let domain_dir = tempfile::tempdir().unwrap();
        write_self_signed(server_dir.path(), "localhost");
        write_self_signed(domain_dir.path(), "example.com");

        let selector = CertificateSelector::build(
            Some(server_dir.path()),
            vec![("example.com".to_string(), domain_dir.path().to_path_buf())],
            SystemTime::now(),
        );
        assert!(!selector.is_empty());

        let domain = selector.select(Some("EXAMPLE.com")).unwrap();
        let fallback = selector.select(Some("other.org")).unwrap();
        assert!(Arc::ptr_eq(&domain, &selector.domain_certificate("example.com").unwrap()));
        assert!(!Arc::ptr_eq(&domain, &fallback));
        assert!(Arc::ptr_eq(&fallback, &selector.select(None).unwrap()));
    }

    #[test]
    fn selector_without_server_certificate_uses_first_domain() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write_self_signed(a.path(), "a.example");
        write_self_signed(b.path(), "b.example");
        let missing = tempfile::tempdir().unwrap();

        let selector = CertificateSelector::build(
            Some(missing.path()),
            vec![
                ("b.example".to_string(), b.path().to_path_buf()),
                ("a.example".to_string(), a.path().to_path_buf()),
            ],
            SystemTime::now(),
        );
        let default = selector.select(None).unwrap();
        assert!(Arc::ptr_eq(&default, &selector.domain_certificate("a.example").unwrap()));
        assert!(Arc::new(selector).server_config().is_ok());
    }

    #[test]
    fn empty_selector_has_no_default() {
        let selector = CertificateSelector::build(None, Vec::new(), SystemTime::now());
        assert!(selector.is_empty());
        assert!(selector.select(Some("example.com")).is_none());
    }
}
