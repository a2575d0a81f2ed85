//! Server administration.
//!
//! Requests below [`ADMIN_PREFIX`] are routed to the admin pseudo-domain,
//! whose pipeline ends in the `server-admin` stage. That stage handles
//! account setup and login, gates the admin site behind a logged-in account,
//! runs admin commands and serves files from the admin site root.

pub mod accounts;
pub mod commands;
pub mod pages;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::pipeline::services::resource_path::{resolve, Resolution};
use crate::pipeline::{FormFields, Outcome, Service, ServiceContext};
use crate::session::{Session, SessionKey, SessionValue};

pub use accounts::{Account, AccountStore, MemoryAccountStore};
pub use commands::AdminCommand;

/// Path prefix of the admin interface.
pub const ADMIN_PREFIX: &str = "/serveradmin";

pub const CREATE_ACCOUNT_NAME: &str = "ServerAdminCreateAccountName";
pub const CREATE_ACCOUNT_PWD1: &str = "ServerAdminCreateAccountPwd1";
pub const CREATE_ACCOUNT_PWD2: &str = "ServerAdminCreateAccountPwd2";
pub const CREATE_ACCOUNT_ROOT: &str = "ServerAdminCreateAccountRoot";
pub const LOGIN_NAME: &str = "ServerAdminLoginName";
pub const LOGIN_PWD: &str = "ServerAdminLoginPwd";

/// Minimum time between a failed login and the next attempt.
pub const LOGIN_LOCKOUT: Duration = Duration::from_millis(2000);

/// Account names must be shorter than this, in bytes.
const MAX_ACCOUNT_NAME_LEN: usize = 30;

const COMMAND_SEGMENT: &str = "/sfcommand/";

/// True if `path` addresses the admin interface.
pub fn is_admin_path(path: &str) -> bool {
    strip_admin_prefix(path).is_some()
}

/// The part of `path` after the admin prefix, without a trailing slash.
fn strip_admin_prefix(path: &str) -> Option<&str> {
    let head = path.get(..ADMIN_PREFIX.len())?;
    if !head.eq_ignore_ascii_case(ADMIN_PREFIX) {
        return None;
    }
    let rest = &path[ADMIN_PREFIX.len()..];
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest.trim_end_matches('/'))
    } else {
        None
    }
}

/// The `server-admin` stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerAdmin;

enum Login {
    /// Continue with this admin site path.
    Proceed(String),
    /// A page has been set, the stage is done.
    Answered,
}

impl Service for ServerAdmin {
    fn name(&self) -> &'static str {
        "server-admin"
    }

    fn process(&self, ctx: &mut ServiceContext) -> Outcome {
        if ctx.is_decided() {
            return Outcome::Continue;
        }

        if !Arc::ptr_eq(&ctx.domain, ctx.server.admin_domain()) {
            tracing::error!(
                conn = %ctx.connection.log_id(),
                domain = %ctx.domain.name(),
                "server-admin runs only in the admin domain"
            );
            return Outcome::Abort;
        }

        let Some(path) = ctx.request.path().map(str::to_string) else {
            ctx.reject(400, "Missing request URL");
            return Outcome::Continue;
        };
        let mut rel_path = strip_admin_prefix(&path).unwrap_or(&path).to_string();

        let Some(session) = ctx.session() else {
            tracing::error!(
                conn = %ctx.connection.log_id(),
                "No session, get-session must run before server-admin"
            );
            return Outcome::Abort;
        };

        if let Some(fields) = ctx.info.post_fields().cloned() {
            match login(ctx, &session, &fields, rel_path) {
                Login::Proceed(path) => rel_path = path,
                Login::Answered => return Outcome::Continue,
            }
        }

        if !is_css(&rel_path) && !is_logged_in(ctx, &session) {
            if ctx.server.accounts().is_empty() {
                tracing::debug!(conn = %ctx.connection.log_id(), "Admin account must be created first");
                set_page(ctx, pages::create_account("", pages::FieldErrors::default()));
            } else {
                tracing::debug!(conn = %ctx.connection.log_id(), "Admin must log in first");
                login_page(ctx);
            }
            remember_url(&session, &rel_path);
            return Outcome::Continue;
        }

        if rel_path == "/adminstatusroot" {
            let html = pages::status(&ctx.server, None);
            set_page(ctx, html);
            return Outcome::Continue;
        }

        if rel_path == "/logout.html" {
            session.remove(SessionKey::Account);
            session.remove(SessionKey::PreLoginUrl);
        }

        if let Some(name) = rel_path.strip_prefix(COMMAND_SEGMENT) {
            let name = name.split('/').next().unwrap_or(name);
            match name.parse::<AdminCommand>() {
                Ok(command) => {
                    let mut fields = ctx.info.post_fields().cloned().unwrap_or_default();
                    command.execute(&ctx.server, &mut fields);
                    rel_path = command.target_page().to_string();
                }
                Err(e) => tracing::error!(conn = %ctx.connection.log_id(), error = %e, "Admin command ignored"),
            }
        }

        serve_site(ctx, &session, &rel_path);
        Outcome::Continue
    }
}

/// Handle account creation and login forms.
fn login(ctx: &mut ServiceContext, session: &Session, fields: &FormFields, rel_path: String) -> Login {
    if ctx.server.accounts().is_empty() {
        return create_account(ctx, session, fields);
    }

    let (Some(name), Some(password)) = (fields.get(LOGIN_NAME), fields.get(LOGIN_PWD)) else {
        return Login::Proceed(rel_path);
    };

    let now = Instant::now();
    if let Some(previous) = session.last_failed_login() {
        if now.saturating_duration_since(previous) < LOGIN_LOCKOUT {
            session.set(SessionKey::LastFailedLoginAttempt, SessionValue::Instant(now));
            login_page(ctx);
            return Login::Answered;
        }
    }

    match ctx.server.accounts().get_account(name, password) {
        Some(account) => {
            tracing::info!(conn = %ctx.connection.log_id(), admin = %name, account = %account.uuid, "Admin logged in");
            session.set(SessionKey::Account, SessionValue::Account(account));
            let target = match session.remove(SessionKey::PreLoginUrl) {
                Some(SessionValue::Text(url)) if url != "/login.html" => url,
                _ => String::new(),
            };
            Login::Proceed(target)
        }
        None => {
            tracing::info!(conn = %ctx.connection.log_id(), admin = %name, "Admin login failed");
            session.remove(SessionKey::Account);
            session.set(SessionKey::LastFailedLoginAttempt, SessionValue::Instant(now));
            login_page(ctx);
            Login::Answered
        }
    }
}

fn create_account(ctx: &mut ServiceContext, session: &Session, fields: &FormFields) -> Login {
    let (Some(name), Some(pwd1), Some(pwd2), Some(root)) = (
        fields.get(CREATE_ACCOUNT_NAME),
        fields.get(CREATE_ACCOUNT_PWD1),
        fields.get(CREATE_ACCOUNT_PWD2),
        fields.get(CREATE_ACCOUNT_ROOT),
    ) else {
        tracing::debug!(conn = %ctx.connection.log_id(), "Account creation field(s) missing");
        set_page(ctx, pages::create_account("", pages::FieldErrors::default()));
        return Login::Answered;
    };

    let errors = pages::FieldErrors {
        name: name.is_empty() || name.len() >= MAX_ACCOUNT_NAME_LEN,
        password: pwd1.is_empty() || pwd1 != pwd2,
        root: root.is_empty() || !Path::new(root).join("index.sf.html").is_file(),
    };
    if errors.name {
        set_page(ctx, pages::create_account("", errors));
        return Login::Answered;
    }
    if errors.password || errors.root {
        set_page(ctx, pages::create_account(name, errors));
        return Login::Answered;
    }

    let Some(account) = ctx.server.accounts().new_account(name, pwd1) else {
        tracing::error!(conn = %ctx.connection.log_id(), admin = %name, "Cannot create admin account");
        ctx.reject(500, "Admin account creation failed");
        return Login::Answered;
    };
    tracing::info!(conn = %ctx.connection.log_id(), admin = %name, "Admin account created");

    if let Err(e) = ctx.server.set_parameter("admin_site_root", root) {
        tracing::error!(error = %e, "Cannot set admin site root");
    }
    if let Err(e) = ctx.server.save_configuration() {
        tracing::warn!(error = %e, "Admin site root not persisted");
    }
    session.set(SessionKey::Account, SessionValue::Account(account));
    Login::Proceed(String::new())
}

fn is_logged_in(ctx: &ServiceContext, session: &Session) -> bool {
    session
        .account()
        .is_some_and(|account| ctx.server.accounts().contains(&account.name))
}

fn is_css(rel_path: &str) -> bool {
    Path::new(rel_path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("css"))
}

fn remember_url(session: &Session, rel_path: &str) {
    if !rel_path.is_empty() {
        session.set(SessionKey::PreLoginUrl, SessionValue::Text(rel_path.to_string()));
    }
}

fn set_page(ctx: &mut ServiceContext, html: String) {
    ctx.response.set_html(html);
    ctx.response.code = Some(200);
}

/// The admin site's own `login.sf.html` if there is one, else the built-in page.
fn login_page(ctx: &mut ServiceContext) {
    let root = ctx.server.parameters().admin_site_root.clone();
    if !root.is_empty() {
        if let Ok(content) = std::fs::read(Path::new(&root).join("login.sf.html")) {
            ctx.response.content_type = Some("text/html; charset=utf-8".to_string());
            ctx.response.body = Bytes::from(content);
            ctx.response.code = Some(200);
            return;
        }
    }
    set_page(ctx, pages::login());
}

/// Serve `rel_path` from the admin site root.
fn serve_site(ctx: &mut ServiceContext, session: &Session, rel_path: &str) {
    let root = ctx.server.parameters().admin_site_root.clone();
    if root.is_empty() {
        let html = pages::status(&ctx.server, None);
        set_page(ctx, html);
        remember_url(session, rel_path);
        return;
    }

    let root = Path::new(&root);
    let url_path = if rel_path.is_empty() { "/" } else { rel_path };
    let root_is_valid = root.is_dir();
    match resolve(root, url_path) {
        Resolution::Found(path) => match std::fs::read(&path) {
            Ok(content) => {
                let mime = mime_guess::from_path(&path).first_or_octet_stream();
                ctx.response.content_type = Some(mime.essence_str().to_string());
                ctx.response.body = Bytes::from(content);
                ctx.response.code = Some(200);
            }
            Err(e) => ctx.reject(500, format!("Cannot read {}: {}", path.display(), e)),
        },
        Resolution::BadRequest(details) => ctx.reject(400, details),
        _ if !root_is_valid => {
            let html = pages::status(&ctx.server, Some("Admin site root is not a directory, set a new one:"));
            set_page(ctx, html);
        }
        Resolution::Forbidden(details) => ctx.reject(403, details),
        Resolution::NotFound(details) => ctx.reject(404, details),
    }
}
