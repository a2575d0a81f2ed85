//! `get-file-at-resource-path`: load the resolved file into the response.

use bytes::Bytes;

use crate::pipeline::{Outcome, Service, ServiceContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct GetFileAtResourcePath;

impl Service for GetFileAtResourcePath {
    fn name(&self) -> &'static str {
        "get-file-at-resource-path"
    }

    fn process(&self, ctx: &mut ServiceContext) -> Outcome {
        if ctx.is_decided() {
            return Outcome::Continue;
        }

        let Some(path) = ctx.info.resource_path().map(|p| p.to_path_buf()) else {
            tracing::error!(
                conn = %ctx.connection.log_id(),
                domain = %ctx.domain.name(),
                "No resource path for an undecided request"
            );
            return Outcome::Abort;
        };

        match std::fs::read(&path) {
            Ok(content) => {
                let mime = mime_guess::from_path(&path).first_or_octet_stream();
                ctx.response.content_type = Some(mime.essence_str().to_string());
                ctx.response.body = Bytes::from(content);
                ctx.response.code = Some(200);
            }
            Err(e) => {
                ctx.reject(500, format!("Cannot read {}: {}", path.display(), e));
            }
        }
        Outcome::Continue
    }
}
