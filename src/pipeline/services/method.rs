//! `only-get-or-post`: admit GET and POST, refuse everything else.

use crate::pipeline::{ChainKey, ChainValue, Outcome, Service, ServiceContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct OnlyGetOrPost;

impl Service for OnlyGetOrPost {
    fn name(&self) -> &'static str {
        "only-get-or-post"
    }

    fn process(&self, ctx: &mut ServiceContext) -> Outcome {
        if ctx.is_decided() {
            return Outcome::Continue;
        }

        let operation = match ctx.request.operation.as_deref().map(str::trim) {
            Some(op) if !op.is_empty() => op.to_string(),
            _ => {
                ctx.reject(400, "Could not extract operation");
                return Outcome::Continue;
            }
        };

        if operation != "GET" && operation != "POST" {
            ctx.reject(501, format!("Operation {} not supported", operation));
            return Outcome::Continue;
        }

        ctx.info.insert(ChainKey::Operation, ChainValue::Text(operation));
        Outcome::Continue
    }
}
