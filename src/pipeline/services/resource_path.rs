//! `get-resource-path-from-url`: map the URL onto a file below the domain root.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use crate::pipeline::{ChainKey, ChainValue, Outcome, Service, ServiceContext};

/// Index files probed for a directory, in priority order.
pub const INDEX_FILES: &[&str] = &["index.html", "index.sf.html", "index.htm", "index.sf.htm"];

/// Result of mapping a URL path onto the file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Found(PathBuf),
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetResourcePathFromUrl;

impl Service for GetResourcePathFromUrl {
    fn name(&self) -> &'static str {
        "get-resource-path-from-url"
    }

    fn process(&self, ctx: &mut ServiceContext) -> Outcome {
        if ctx.is_decided() {
            return Outcome::Continue;
        }

        let Some(url_path) = ctx.request.path().map(str::to_string) else {
            ctx.reject(400, "Missing request URL");
            return Outcome::Continue;
        };

        match resolve(&ctx.domain.root(), &url_path) {
            Resolution::Found(path) => {
                ctx.info.insert(ChainKey::ResourcePath, ChainValue::Path(path));
            }
            Resolution::BadRequest(details) => ctx.reject(400, details),
            Resolution::Forbidden(details) => ctx.reject(403, details),
            Resolution::NotFound(details) => {
                ctx.domain.record_404(&url_path);
                ctx.reject(404, details);
            }
        }
        Outcome::Continue
    }
}

/// Resolve `url_path` below `root`.
pub(crate) fn resolve(root: &Path, url_path: &str) -> Resolution {
    let decoded = match urlencoding::decode(url_path) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => return Resolution::BadRequest(format!("URL {} is not valid UTF-8", url_path)),
    };

    let relative = Path::new(decoded.trim_start_matches('/'));
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Resolution::BadRequest(format!("URL {} leaves the domain root", url_path)),
        }
    }

    let candidate = root.join(relative);
    if candidate.is_dir() {
        return INDEX_FILES
            .iter()
            .map(|index| candidate.join(index))
            .find(|path| path.is_file() && is_readable(path))
            .map(Resolution::Found)
            .unwrap_or_else(|| Resolution::NotFound(format!("No index file in {}", url_path)));
    }

    if candidate.exists() {
        return if is_readable(&candidate) {
            Resolution::Found(candidate)
        } else {
            Resolution::Forbidden(format!("Resource {} is not readable", url_path))
        };
    }

    for variant in templated_variants(&candidate) {
        if variant.is_file() {
            return if is_readable(&variant) {
                Resolution::Found(variant)
            } else {
                Resolution::Forbidden(format!("Resource {} is not readable", url_path))
            };
        }
    }
    Resolution::NotFound(format!("Resource {} not found", url_path))
}

/// `page.html` → `page.sf.html`; `report` → `report.sf.html`, `report.sf.htm`.
fn templated_variants(path: &Path) -> Vec<PathBuf> {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => vec![path.with_file_name(format!("{}.sf.{}", stem, ext))],
        None => vec![
            path.with_file_name(format!("{}.sf.html", stem)),
            path.with_file_name(format!("{}.sf.htm", stem)),
        ],
    }
}

fn is_readable(path: &Path) -> bool {
    File::open(path).is_ok()
}
