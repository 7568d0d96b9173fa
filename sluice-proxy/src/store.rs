use std::sync::Mutex;

use sluice_net::{OriginalDestination, Request, Response};
use sluice_storage::{CaptureEvent, CaptureRequest, CaptureResponse, CaptureWorkerHandle};

/// Receives every response the proxy forwards, after the client has it.
///
/// Implementations are shared by all connections and called concurrently.
pub trait BackingStore: Send + Sync {
    fn save(&self, response: &Response, destination: &OriginalDestination) -> Result<(), String>;
}

/// Hands exchanges to the capture writer thread without blocking the caller.
pub struct CaptureBackingStore {
    worker: CaptureWorkerHandle,
    https_ports: Vec<u16>,
}

impl CaptureBackingStore {
    pub fn new(worker: CaptureWorkerHandle, https_ports: Vec<u16>) -> Self {
        Self {
            worker,
            https_ports,
        }
    }
}

impl BackingStore for CaptureBackingStore {
    fn save(&self, response: &Response, destination: &OriginalDestination) -> Result<(), String> {
        let scheme = if self.https_ports.contains(&destination.port()) {
            "https"
        } else {
            "http"
        };
        let event = CaptureEvent {
            request: build_request_record(&response.request, destination, scheme),
            response: Some(build_response_record(response)),
        };
        self.worker.try_send(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedExchange {
    pub response: Response,
    pub destination: OriginalDestination,
}

/// Keeps saved exchanges in memory, in save order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<SavedExchange>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<SavedExchange> {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BackingStore for MemoryStore {
    fn save(&self, response: &Response, destination: &OriginalDestination) -> Result<(), String> {
        self.saved
            .lock()
            .map_err(|err| err.to_string())?
            .push(SavedExchange {
                response: response.clone(),
                destination: *destination,
            });
        Ok(())
    }
}

pub(crate) fn build_request_record(
    request: &Request,
    destination: &OriginalDestination,
    scheme: &str,
) -> CaptureRequest {
    let default_port = if scheme == "https" { 443 } else { 80 };
    let (host, port, target) = resolve_target(request)
        .unwrap_or_else(|| {
            (
                destination.ip().to_string(),
                Some(destination.port()),
                request.line.target.clone(),
            )
        });
    let port = port.unwrap_or(destination.port());
    let query = target
        .split_once('?')
        .map(|(_, query)| query.to_string());
    let authority = if port == default_port {
        host.clone()
    } else {
        format!("{host}:{port}")
    };

    CaptureRequest {
        source: "proxy".to_string(),
        destination: destination.to_string(),
        method: request.line.method.clone(),
        scheme: scheme.to_string(),
        url: format!("{scheme}://{authority}{target}"),
        host,
        port,
        target,
        query,
        http_version: request.line.version.as_str().to_string(),
        request_head: request.head_bytes().to_vec(),
        request_body: request.body.clone(),
        request_body_size: request.body.len(),
        request_body_truncated: false,
        started_at: chrono::Utc::now().to_rfc3339(),
    }
}

pub(crate) fn build_response_record(response: &Response) -> CaptureResponse {
    CaptureResponse {
        capture_request_id: 0,
        status_code: response.line.status_code,
        reason: Some(response.line.reason.clone()),
        response_head: response.head_bytes().to_vec(),
        response_body: response.body.clone(),
        response_body_size: response.body.len(),
        response_body_truncated: false,
        http_version: response.line.version.as_str().to_string(),
        received_at: chrono::Utc::now().to_rfc3339(),
    }
}

/// Host, explicit port and origin-form target of a request.
fn resolve_target(request: &Request) -> Option<(String, Option<u16>, String)> {
    let target = request.line.target.as_str();
    if target.starts_with("http://") || target.starts_with("https://") {
        if let Ok(url) = url::Url::parse(target) {
            let host = url.host_str()?.to_string();
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            return Some((host, url.port_or_known_default(), path));
        }
    }

    let (host, port) = split_host_port(request.header("host")?);
    Some((host, port, target.to_string()))
}

fn split_host_port(host: &str) -> (String, Option<u16>) {
    if let Some((name, port)) = host.rsplit_once(':') {
        if !name.ends_with(']') && name.contains(':') {
            return (host.to_string(), None);
        }
        if let Ok(port) = port.parse::<u16>() {
            return (name.to_string(), Some(port));
        }
    }
    (host.to_string(), None)
}
