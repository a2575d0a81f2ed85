//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use origin_server::config::{DomainConfig, ServerConfig};
use origin_server::{Collaborators, Server, ServerContext};
use tempfile::TempDir;

pub const SITE: &str = "site.example";

/// A started server with one domain, `site.example`, rooted in a temp dir.
pub struct Harness {
    pub server: Server,
    pub context: Arc<ServerContext>,
    pub http: SocketAddr,
    pub dir: TempDir,
}

impl Harness {
    pub fn site_root(&self) -> std::path::PathBuf {
        self.dir.path().join("site")
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.http, path)
    }

    pub fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap()
    }

    pub async fn get(&self, host: &str, path: &str) -> reqwest::Response {
        Self::client()
            .get(self.url(path))
            .header("Host", host)
            .send()
            .await
            .unwrap()
    }

    pub async fn stop(mut self) {
        assert!(self.server.stop().await);
    }
}

/// Start a server. `edit` may adjust the configuration first.
pub async fn start<F>(edit: F) -> Harness
where
    F: FnOnce(&mut ServerConfig, &Path),
{
    let dir = tempfile::tempdir().unwrap();
    let site = dir.path().join("site");
    std::fs::create_dir_all(&site).unwrap();
    std::fs::write(site.join("index.html"), "<h1>welcome</h1>").unwrap();

    let mut config = ServerConfig::default();
    config.parameters.bind_address = "127.0.0.1".into();
    config.parameters.http_port = 0;
    config.parameters.https_port = 0;
    config.parameters.listener_drain_timeout_secs = 5;
    config.parameters.statistics_file = dir.path().join("statistics.jsonl");
    config.parameters.domains_dir = dir.path().join("domains");
    config.domains.push(DomainConfig {
        name: SITE.into(),
        root: site,
        ..DomainConfig::default()
    });
    edit(&mut config, dir.path());

    let collaborators = Collaborators::from_parameters(&config.parameters);
    let (context, control) = ServerContext::new(config, None, collaborators).unwrap();
    let mut server = Server::new(Arc::clone(&context), control);
    server.start().await.unwrap();
    let http = server.http_addr().unwrap();

    Harness {
        server,
        context,
        http,
        dir,
    }
}
