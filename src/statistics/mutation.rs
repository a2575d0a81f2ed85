//! Request outcome records.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// What a mutation does to the statistics database.
///
/// The server itself only produces `AddClientRecord`. The update kinds are
/// reserved for statistics stores that edit their own records (admin-side
/// path and client annotations) and share this wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// A request was received or answered.
    AddClientRecord,
    /// Change the properties of a recorded path part.
    UpdatePathPart,
    /// Change the properties of a recorded client.
    UpdateClient,
}

/// One event in a request's lifecycle.
///
/// Built once by a pipeline stage and handed to the statistics channel by
/// value; nothing holds a mutable reference to it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub kind: MutationKind,
    /// Milliseconds since the Unix epoch.
    pub request_received: Option<u64>,
    pub request_completed: Option<u64>,
    pub domain: String,
    pub url: Option<String>,
    pub http_response_code: Option<u16>,
    pub response_details: Option<String>,
    pub connection_object_id: usize,
    pub connection_allocation_count: u64,
    /// Log id of the socket that carried the request.
    pub socket: u64,
    pub client: String,
    pub do_not_trace: bool,
}

impl Mutation {
    pub fn new(kind: MutationKind, domain: &str) -> Self {
        Self {
            kind,
            request_received: None,
            request_completed: None,
            domain: domain.to_string(),
            url: None,
            http_response_code: None,
            response_details: None,
            connection_object_id: 0,
            connection_allocation_count: 0,
            socket: 0,
            client: String::new(),
            do_not_trace: false,
        }
    }

    pub fn with_url(mut self, url: Option<&str>) -> Self {
        self.url = url.map(str::to_string);
        self
    }

    pub fn with_response(mut self, code: u16, details: impl Into<String>) -> Self {
        self.http_response_code = Some(code);
        self.response_details = Some(details.into());
        self
    }

    pub fn with_connection(mut self, object_id: usize, allocation_count: u64, socket: u64) -> Self {
        self.connection_object_id = object_id;
        self.connection_allocation_count = allocation_count;
        self.socket = socket;
        self
    }

    pub fn with_client(mut self, client: &str, do_not_trace: bool) -> Self {
        self.client = client.to_string();
        self.do_not_trace = do_not_trace;
        self
    }

    pub fn with_timestamps(mut self, received: Option<u64>, completed: Option<u64>) -> Self {
        self.request_received = received;
        self.request_completed = completed;
        self
    }
}

/// Current wall clock time in milliseconds since the Unix epoch.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
