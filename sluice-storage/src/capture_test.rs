use std::sync::{Arc, Mutex};

use crate::capture::{
    BodyLimits, CaptureInsertResult, CaptureRecorder, CaptureRequest, CaptureResponse,
    CaptureStore,
};

#[derive(Default)]
struct MockStore {
    last_request: Mutex<Option<CaptureRequest>>,
    last_response: Mutex<Option<CaptureResponse>>,
}

impl CaptureStore for Arc<MockStore> {
    fn insert_request(&self, request: CaptureRequest) -> Result<CaptureInsertResult, String> {
        *self.last_request.lock().unwrap() = Some(request);
        Ok(CaptureInsertResult { request_id: 42 })
    }

    fn insert_response(&self, response: CaptureResponse) -> Result<(), String> {
        *self.last_response.lock().unwrap() = Some(response);
        Ok(())
    }
}

pub(crate) fn sample_request() -> CaptureRequest {
    CaptureRequest {
        source: "proxy".to_string(),
        destination: "93.184.216.34:80".to_string(),
        method: "GET".to_string(),
        scheme: "http".to_string(),
        host: "example.com".to_string(),
        port: 80,
        target: "/".to_string(),
        query: None,
        url: "http://example.com/".to_string(),
        http_version: "HTTP/1.1".to_string(),
        request_head: b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec(),
        request_body: Vec::new(),
        request_body_size: 0,
        request_body_truncated: false,
        started_at: "2026-01-01T00:00:00+00:00".to_string(),
    }
}

pub(crate) fn sample_response(request_id: i64) -> CaptureResponse {
    CaptureResponse {
        capture_request_id: request_id,
        status_code: 200,
        reason: Some("OK".to_string()),
        response_head: b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec(),
        response_body: Vec::new(),
        response_body_size: 0,
        response_body_truncated: false,
        http_version: "HTTP/1.1".to_string(),
        received_at: "2026-01-01T00:00:01+00:00".to_string(),
    }
}

#[test]
fn body_limits_default() {
    let limits = BodyLimits::default();
    assert_eq!(limits.request_max_bytes, 5 * 1024 * 1024);
    assert_eq!(limits.response_max_bytes, 20 * 1024 * 1024);
}

#[test]
fn recorder_truncates_request_body() {
    let store = Arc::new(MockStore::default());
    let limits = BodyLimits {
        request_max_bytes: 4,
        response_max_bytes: 10,
    };
    let recorder = CaptureRecorder::new(Box::new(store.clone()), limits);

    let mut request = sample_request();
    request.request_body = b"abcdefgh".to_vec();
    let result = recorder.record_request(request).unwrap();
    assert_eq!(result.request_id, 42);

    let stored = store.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(stored.request_body, b"abcd");
    assert_eq!(stored.request_body_size, 8);
    assert!(stored.request_body_truncated);
}

#[test]
fn recorder_keeps_small_response_body() {
    let store = Arc::new(MockStore::default());
    let recorder = CaptureRecorder::new(Box::new(store.clone()), BodyLimits::default());

    let mut response = sample_response(42);
    response.response_body = b"hello".to_vec();
    recorder.record_response(response).unwrap();

    let stored = store.last_response.lock().unwrap().clone().unwrap();
    assert_eq!(stored.response_body, b"hello");
    assert_eq!(stored.response_body_size, 5);
    assert!(!stored.response_body_truncated);
}
