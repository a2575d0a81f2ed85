//! Session subsystem.
//!
//! Each domain owns a [`SessionStore`]. The `get-session` pipeline stage binds
//! a request to a session through the [`SESSION_COOKIE_NAME`] cookie.

pub mod store;

pub use store::{
    Session, SessionActivity, SessionKey, SessionStore, SessionValue, MAX_SESSION_ACTIVITIES,
    SESSION_COOKIE_NAME,
};
