//! `decode-post-form-urlencoded`: turn an urlencoded body into form fields.

use crate::pipeline::{ChainKey, ChainValue, FormFields, Outcome, Service, ServiceContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct DecodePostFormUrlEncoded;

impl Service for DecodePostFormUrlEncoded {
    fn name(&self) -> &'static str {
        "decode-post-form-urlencoded"
    }

    fn process(&self, ctx: &mut ServiceContext) -> Outcome {
        if ctx.is_decided() || ctx.request.body.is_empty() {
            return Outcome::Continue;
        }

        let Ok(text) = std::str::from_utf8(&ctx.request.body) else {
            tracing::debug!(conn = %ctx.connection.log_id(), "Request body is not UTF-8, not decoded");
            return Outcome::Continue;
        };

        let fields = decode_form(text);
        if !fields.is_empty() {
            ctx.info.insert(ChainKey::PostFields, ChainValue::Fields(fields));
        }
        Outcome::Continue
    }
}

/// Decode `a=1&b=x+y`. The first `=` of a pair is the delimiter.
pub fn decode_form(text: &str) -> FormFields {
    let mut fields = FormFields::new();
    for pair in text.trim().split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = decode_component(name);
        if name.is_empty() {
            continue;
        }
        fields.insert(name, decode_component(value));
    }
    fields
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpRequest;
    use crate::testing::TestServer;

    #[test]
    fn decodes_pairs() {
        let fields = decode_form("name=John+Doe&note=a%26b&eq=x=y=z&empty=&=orphan");
        assert_eq!(fields.get("name"), Some("John Doe"));
        assert_eq!(fields.get("note"), Some("a&b"));
        assert_eq!(fields.get("eq"), Some("x=y=z"));
        assert_eq!(fields.get("empty"), Some(""));
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn stage_stores_fields() {
        let server = TestServer::new();
        let mut ctx = server.context(HttpRequest::new("POST", "/").with_body("a=1&b=2"));
        DecodePostFormUrlEncoded.process(&mut ctx);
        let fields = ctx.info.post_fields().unwrap();
        assert_eq!(fields.get("a"), Some("1"));
        assert_eq!(fields.get("b"), Some("2"));
    }

    #[test]
    fn no_body_or_bad_utf8_is_noop() {
        let server = TestServer::new();
        let mut ctx = server.context(HttpRequest::new("POST", "/"));
        DecodePostFormUrlEncoded.process(&mut ctx);
        assert!(!ctx.info.contains(ChainKey::PostFields));
        assert!(!ctx.is_decided());

        let mut ctx = server.context(HttpRequest::new("POST", "/").with_body(vec![0xff, 0xfe, b'=']));
        DecodePostFormUrlEncoded.process(&mut ctx);
        assert!(!ctx.info.contains(ChainKey::PostFields));
    }

    #[test]
    fn decided_request_keeps_chain_untouched() {
        let server = TestServer::new();
        let mut ctx = server.context(HttpRequest::new("POST", "/").with_body("a=1"));
        ctx.response.code = Some(400);
        DecodePostFormUrlEncoded.process(&mut ctx);
        assert!(!ctx.info.contains(ChainKey::PostFields));
    }
}
