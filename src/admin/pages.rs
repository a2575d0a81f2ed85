//! Built-in admin pages, used before an admin site exists.

use std::fmt::Write as _;

use crate::admin::{CREATE_ACCOUNT_NAME, CREATE_ACCOUNT_PWD1, CREATE_ACCOUNT_PWD2, CREATE_ACCOUNT_ROOT};
use crate::admin::{LOGIN_NAME, LOGIN_PWD};
use crate::context::ServerContext;

/// Which fields of the account form were rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldErrors {
    pub name: bool,
    pub password: bool,
    pub root: bool,
}

fn color(error: bool) -> &'static str {
    if error {
        "red"
    } else {
        "black"
    }
}

/// Escape text for use inside HTML content or a quoted attribute.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn create_account(name: &str, errors: FieldErrors) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html><head><title>Server Admin Setup</title></head><body><div>",
            "<form action=\"/serveradmin\" method=\"post\"><div>",
            "<h3>Server Admin Setup</h3>",
            "<p style=\"margin-bottom:0px;color:{name_color};\">Admin:</p>",
            "<input type=\"text\" name=\"{name_field}\" value=\"{name}\"><br>",
            "<p style=\"margin-bottom:0px;color:{pwd_color};\">Password:</p>",
            "<input type=\"password\" name=\"{pwd1_field}\" value=\"\"><br>",
            "<p style=\"margin-bottom:0px;color:{pwd_color};\">Repeat:</p>",
            "<input type=\"password\" name=\"{pwd2_field}\" value=\"\"><br>",
            "<p style=\"margin-bottom:0px;color:{root_color};\">Root directory for the server admin site:</p>",
            "<input type=\"text\" name=\"{root_field}\" value=\"\" style=\"min-width:300px;\"><br><br>",
            "<input type=\"submit\" value=\"Submit\">",
            "</div></form></div></body></html>"
        ),
        name_color = color(errors.name),
        pwd_color = color(errors.password),
        root_color = color(errors.root),
        name_field = CREATE_ACCOUNT_NAME,
        pwd1_field = CREATE_ACCOUNT_PWD1,
        pwd2_field = CREATE_ACCOUNT_PWD2,
        root_field = CREATE_ACCOUNT_ROOT,
        name = escape(name),
    )
}

pub fn login() -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html><head><title>Server Admin Login</title></head><body><div>",
            "<form action=\"/serveradmin\" method=\"post\"><div>",
            "<h3>Server Admin Login</h3>",
            "<p style=\"margin-bottom:0px;\">Name:</p>",
            "<input type=\"text\" name=\"{name_field}\" value=\"\"><br>",
            "<p style=\"margin-bottom:0px;\">Password:</p>",
            "<input type=\"password\" name=\"{pwd_field}\" value=\"\"><br>",
            "<input type=\"submit\" value=\"Submit\">",
            "</div></form></div></body></html>"
        ),
        name_field = LOGIN_NAME,
        pwd_field = LOGIN_PWD,
    )
}

/// Server status with a form to set the admin site root.
pub fn status(server: &ServerContext, message: Option<&str>) -> String {
    let parameters = server.parameters();
    let root = &parameters.admin_site_root;
    let root_is_dir = !root.is_empty() && std::path::Path::new(root).is_dir();
    let telemetry = server.telemetry();

    let mut html = String::from(
        "<!DOCTYPE html><html><head><title>Server Status</title></head><body><div><h3>Server Status</h3>",
    );
    let rows = [
        ("Version", env!("CARGO_PKG_VERSION").to_string()),
        ("HTTP Server Status", telemetry.http_status().as_str().to_string()),
        ("HTTPS Server Status", telemetry.https_status().as_str().to_string()),
        ("Accepted connections", telemetry.nof_accepted_connections.to_string()),
        ("Blacklisted accesses", telemetry.nof_blacklisted_accesses.to_string()),
        ("Unknown domain requests", telemetry.nof_unknown_domain.to_string()),
        ("Domains", server.domains().len().to_string()),
    ];
    for (label, value) in rows {
        let _ = write!(html, "<p style=\"margin-bottom:0px;\">{}: {}</p>", label, escape(&value));
    }
    let _ = write!(
        html,
        concat!(
            "<form action=\"/serveradmin/sfcommand/SetRoot\" method=\"post\"><div>",
            "<p style=\"margin-bottom:0px;color:{color};\">{message}</p>",
            "<input type=\"text\" name=\"{field}\" value=\"{root}\">",
            "<input type=\"submit\" value=\"Submit/Visit\">",
            "</div></form></div></body></html>"
        ),
        color = color(!root.is_empty() && !root_is_dir),
        message = escape(message.unwrap_or("Set root directory for server admin site:")),
        field = CREATE_ACCOUNT_ROOT,
        root = escape(root),
    );
    html
}
