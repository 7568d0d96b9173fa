use serde::{Deserialize, Serialize};

/// Request half of a recorded exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureRequest {
    pub source: String,
    /// Original destination as `ip:port`.
    pub destination: String,
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub target: String,
    pub query: Option<String>,
    pub url: String,
    pub http_version: String,
    pub request_head: Vec<u8>,
    pub request_body: Vec<u8>,
    pub request_body_size: usize,
    pub request_body_truncated: bool,
    pub started_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureResponse {
    pub capture_request_id: i64,
    pub status_code: u16,
    pub reason: Option<String>,
    pub response_head: Vec<u8>,
    pub response_body: Vec<u8>,
    pub response_body_size: usize,
    pub response_body_truncated: bool,
    pub http_version: String,
    pub received_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BodyLimits {
    pub request_max_bytes: usize,
    pub response_max_bytes: usize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            request_max_bytes: 5 * 1024 * 1024,
            response_max_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureInsertResult {
    pub request_id: i64,
}

pub trait CaptureStore: Send {
    fn insert_request(&self, request: CaptureRequest) -> Result<CaptureInsertResult, String>;
    fn insert_response(&self, response: CaptureResponse) -> Result<(), String>;
}

/// Applies [`BodyLimits`] before records reach the store.
pub struct CaptureRecorder {
    store: Box<dyn CaptureStore>,
    limits: BodyLimits,
}

impl CaptureRecorder {
    pub fn new(store: Box<dyn CaptureStore>, limits: BodyLimits) -> Self {
        Self { store, limits }
    }

    pub fn record_request(
        &self,
        mut request: CaptureRequest,
    ) -> Result<CaptureInsertResult, String> {
        request.request_body_size = request.request_body.len();
        let (body, truncated) = truncate_body(request.request_body, self.limits.request_max_bytes);
        request.request_body = body;
        request.request_body_truncated = truncated;
        self.store.insert_request(request)
    }

    pub fn record_response(&self, mut response: CaptureResponse) -> Result<(), String> {
        response.response_body_size = response.response_body.len();
        let (body, truncated) =
            truncate_body(response.response_body, self.limits.response_max_bytes);
        response.response_body = body;
        response.response_body_truncated = truncated;
        self.store.insert_response(response)
    }
}

fn truncate_body(mut body: Vec<u8>, limit: usize) -> (Vec<u8>, bool) {
    if body.len() > limit {
        body.truncate(limit);
        (body, true)
    } else {
        (body, false)
    }
}
