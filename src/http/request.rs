//! Parsed request handed to the pipeline.
//!
//! The transport layer (hyper) parses the wire format. This type holds what
//! the stages need, detached from hyper so stages can be driven directly in
//! tests.

use bytes::Bytes;

use crate::http::cookie::{parse_cookie_header, Cookie};

#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    /// Request method as sent, `None` when the header carried none.
    pub operation: Option<String>,
    /// Request target (path and query), undecoded.
    pub url: Option<String>,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Milliseconds since the Unix epoch.
    pub received_at_ms: u64,
}

impl HttpRequest {
    pub fn new(operation: &str, url: &str) -> Self {
        Self {
            operation: Some(operation.to_string()),
            url: Some(url.to_string()),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_lowercase(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path part of the URL, without query or fragment.
    pub fn path(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(|url| url.split(['?', '#']).next().unwrap_or(url))
    }

    /// Host header without port, lowercase.
    pub fn host(&self) -> Option<String> {
        let host = self.header("host")?.trim();
        let host = if let Some(rest) = host.strip_prefix('[') {
            // [v6]:port
            rest.split(']').next().unwrap_or(rest)
        } else {
            host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
        };
        (!host.is_empty()).then(|| host.to_lowercase())
    }

    /// Every cookie from every `Cookie` header, in order.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.headers
            .iter()
            .filter(|(n, _)| n == "cookie")
            .flat_map(|(_, v)| parse_cookie_header(v))
            .collect()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// The client sent `DNT: 1`.
    pub fn do_not_track(&self) -> bool {
        self.header("dnt").map(str::trim) == Some("1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_strips_port_and_case() {
        let req = HttpRequest::new("GET", "/").with_header("Host", "Example.COM:8080");
        assert_eq!(req.host().as_deref(), Some("example.com"));

        let req = HttpRequest::new("GET", "/").with_header("Host", "[::1]:6678");
        assert_eq!(req.host().as_deref(), Some("::1"));

        assert_eq!(HttpRequest::new("GET", "/").host(), None);
    }

    #[test]
    fn path_drops_query() {
        let req = HttpRequest::new("GET", "/a/b.html?x=1#top");
        assert_eq!(req.path(), Some("/a/b.html"));
    }

    #[test]
    fn cookies_from_all_headers() {
        let req = HttpRequest::new("GET", "/")
            .with_header("Cookie", "a=1; b=2")
            .with_header("Cookie", "c=3");
        let names: Vec<_> = req.cookies().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn dnt_header() {
        assert!(HttpRequest::new("GET", "/").with_header("DNT", "1").do_not_track());
        assert!(!HttpRequest::new("GET", "/").with_header("DNT", "0").do_not_track());
    }
}
