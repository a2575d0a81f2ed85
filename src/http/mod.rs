//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → handler.rs (hyper HTTP/1.1, keep-alive, domain routing)
//!     → request.rs (HttpRequest handed to the pipeline)
//!     → pipeline stages
//!     → response.rs (HttpResponse → hyper response)
//!     → Send to client
//! ```

pub mod cookie;
pub mod handler;
pub mod request;
pub mod response;

pub use cookie::{Cookie, SetCookie};
pub use request::HttpRequest;
pub use response::{minimal_response, HttpResponse};
