//! `get-session`: bind a session to the request.

use std::time::SystemTime;

use uuid::Uuid;

use crate::http::cookie::SetCookie;
use crate::pipeline::{ChainKey, ChainValue, Outcome, Service, ServiceContext};
use crate::session::{SessionActivity, SESSION_COOKIE_NAME};

#[derive(Debug, Clone, Copy, Default)]
pub struct GetSession;

impl Service for GetSession {
    fn name(&self) -> &'static str {
        "get-session"
    }

    fn process(&self, ctx: &mut ServiceContext) -> Outcome {
        if ctx.is_decided() {
            return Outcome::Continue;
        }

        let timeout = ctx.domain.session_timeout();
        if timeout.as_secs() < 1 {
            return Outcome::Continue;
        }

        let sessions = ctx.domain.sessions();
        let existing = ctx
            .request
            .cookies()
            .into_iter()
            .filter(|cookie| cookie.name == SESSION_COOKIE_NAME)
            .filter_map(|cookie| Uuid::parse_str(cookie.value.trim()).ok())
            .find_map(|id| sessions.active_session(&id));

        let session = match existing {
            Some(session) => {
                if ctx.server.parameters().debug_mode {
                    session.add_activity(SessionActivity {
                        address: ctx.connection.client_ip(),
                        domain: ctx.domain.name(),
                        object_id: ctx.connection.object_id,
                        allocation_count: ctx.connection.allocation_count,
                        at: SystemTime::now(),
                    });
                }
                session
            }
            None => {
                let session = sessions.new_session(&ctx.connection.client_ip(), timeout);
                tracing::debug!(
                    conn = %ctx.connection.log_id(),
                    domain = %ctx.domain.name(),
                    session = %session.id(),
                    "New session"
                );
                session
            }
        };

        ctx.response.set_cookie(
            SetCookie::new(SESSION_COOKIE_NAME, &session.id().to_string()).max_age(timeout.as_secs()),
        );
        ctx.info.insert(ChainKey::Session, ChainValue::Session(session));
        Outcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpRequest;
    use crate::testing::TestServer;

    fn cookie_value(ctx: &ServiceContext) -> String {
        ctx.response
            .cookies
            .iter()
            .find(|c| c.name == SESSION_COOKIE_NAME)
            .map(|c| c.value.clone())
            .unwrap()
    }

    #[test]
    fn creates_session_and_sets_cookie() {
        let server = TestServer::new();
        let mut ctx = server.context(HttpRequest::new("GET", "/"));

        assert_eq!(GetSession.process(&mut ctx), Outcome::Continue);
        let session = ctx.session().unwrap();
        assert_eq!(cookie_value(&ctx), session.id().to_string());
        assert_eq!(server.domain.sessions().len(), 1);
    }

    #[test]
    fn adopts_session_from_cookie() {
        let server = TestServer::new();
        let mut first = server.context(HttpRequest::new("GET", "/"));
        GetSession.process(&mut first);
        let id = first.session().unwrap().id();

        let request = HttpRequest::new("GET", "/")
            .with_header("Cookie", &format!("other=x; {}=not-a-uuid", SESSION_COOKIE_NAME))
            .with_header("Cookie", &format!("{}={}", SESSION_COOKIE_NAME, id));
        let mut second = server.context(request);
        GetSession.process(&mut second);

        assert_eq!(second.session().unwrap().id(), id);
        assert_eq!(server.domain.sessions().len(), 1);
    }

    #[test]
    fn debug_mode_records_activity_on_reuse() {
        let server = TestServer::new();
        let mut first = server.context(HttpRequest::new("GET", "/"));
        GetSession.process(&mut first);
        let session = first.session().unwrap();
        let cookie = format!("{}={}", SESSION_COOKIE_NAME, session.id());

        let mut quiet = server.context(HttpRequest::new("GET", "/").with_header("Cookie", &cookie));
        GetSession.process(&mut quiet);
        assert!(session.activities().is_empty());

        server.server.set_parameter("debug_mode", "true").unwrap();
        let mut traced = server.context(HttpRequest::new("GET", "/").with_header("Cookie", &cookie));
        GetSession.process(&mut traced);

        let activities = session.activities();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].address, "127.0.0.1");
        assert_eq!(activities[0].domain, "test.example");
        assert_eq!(activities[0].allocation_count, traced.connection.allocation_count);
    }

    #[test]
    fn unknown_cookie_gets_fresh_session() {
        let server = TestServer::new();
        let request = HttpRequest::new("GET", "/")
            .with_header("Cookie", &format!("{}={}", SESSION_COOKIE_NAME, Uuid::new_v4()));
        let mut ctx = server.context(request);
        GetSession.process(&mut ctx);
        assert!(ctx.session().is_some());
        assert_eq!(server.domain.sessions().len(), 1);
    }

    #[test]
    fn disabled_or_decided_does_nothing() {
        let server = TestServer::new();
        server.domain.update(|s| s.session_timeout_secs = 0);
        let mut ctx = server.context(HttpRequest::new("GET", "/"));
        GetSession.process(&mut ctx);
        assert!(ctx.session().is_none());
        assert!(ctx.response.cookies.is_empty());

        server.domain.update(|s| s.session_timeout_secs = 600);
        let mut ctx = server.context(HttpRequest::new("GET", "/"));
        ctx.response.code = Some(404);
        GetSession.process(&mut ctx);
        assert!(!ctx.info.contains(ChainKey::Session));
    }
}
