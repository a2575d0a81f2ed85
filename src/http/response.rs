//! Response accumulated across the pipeline.
//!
//! Stages fill in only the fields they own. A set `code` means the outcome
//! is decided and later stages must leave it alone.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE};
use hyper::StatusCode;

use crate::http::cookie::SetCookie;

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub code: Option<u16>,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<SetCookie>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// A response with only a status code.
    pub fn with_code(code: u16) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn is_decided(&self) -> bool {
        self.code.is_some()
    }

    pub fn set_html(&mut self, html: impl Into<String>) {
        self.content_type = Some("text/html; charset=utf-8".to_string());
        self.body = Bytes::from(html.into());
    }

    /// Replace any earlier cookie of the same name.
    pub fn set_cookie(&mut self, cookie: SetCookie) {
        self.cookies.retain(|c| c.name != cookie.name);
        self.cookies.push(cookie);
    }

    /// Convert to a hyper response. An undecided response becomes a 500.
    ///
    /// Error responses without a body get a short HTML body naming the status.
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let status = self
            .code
            .and_then(|c| StatusCode::from_u16(c).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let (content_type, body) = if self.body.is_empty() && status != StatusCode::OK {
            let reason = status.canonical_reason().unwrap_or("");
            (
                Some("text/html; charset=utf-8".to_string()),
                Bytes::from(format!(
                    "<!DOCTYPE html><html><body><h1>{} {}</h1></body></html>",
                    status.as_u16(),
                    reason
                )),
            )
        } else {
            (self.content_type, self.body)
        };

        let mut response = hyper::Response::new(Full::new(body.clone()));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        if let Some(content_type) = content_type.and_then(|v| HeaderValue::from_str(&v).ok()) {
            headers.insert(CONTENT_TYPE, content_type);
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        for cookie in &self.cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                headers.append(SET_COOKIE, value);
            }
        }
        response
    }
}

/// Minimal response for rejected clients, used outside the pipeline.
pub fn minimal_response(code: u16) -> hyper::Response<Full<Bytes>> {
    HttpResponse::with_code(code).into_hyper()
}
