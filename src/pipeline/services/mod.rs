//! Built-in pipeline stages.
//!
//! | name                          | reads                 | writes                    |
//! |-------------------------------|-----------------------|---------------------------|
//! | `get-session`                 | cookies               | `Session`, cookie         |
//! | `only-get-or-post`            | method                | `Operation`               |
//! | `decode-post-form-urlencoded` | body, content type    | `PostFields`              |
//! | `get-resource-path-from-url`  | URL, domain root      | `ResourcePath`            |
//! | `get-file-at-resource-path`   | `ResourcePath`        | body, content type, 200   |
//! | `record-outcome`              | response code         | telemetry, statistics     |

pub mod file;
pub mod form;
pub mod method;
pub mod outcome;
pub mod resource_path;
pub mod session;
