//! `record-outcome`: count and submit the final response code.

use crate::pipeline::{Outcome, Service, ServiceContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordOutcome;

impl Service for RecordOutcome {
    fn name(&self) -> &'static str {
        "record-outcome"
    }

    fn process(&self, ctx: &mut ServiceContext) -> Outcome {
        if ctx.is_recorded() {
            return Outcome::Continue;
        }
        let code = match ctx.response.code {
            Some(code) => code,
            None => {
                ctx.response.code = Some(500);
                500
            }
        };
        ctx.record(code, "Request completed", true);
        Outcome::Continue
    }
}
