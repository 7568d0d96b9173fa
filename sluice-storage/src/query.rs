use serde::{Deserialize, Serialize};

use crate::capture::CaptureRequest;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureQuery {
    pub host: Option<String>,
    pub method: Option<String>,
    pub status: Option<u16>,
    pub destination: Option<String>,
    pub source: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for CaptureQuery {
    fn default() -> Self {
        Self {
            host: None,
            method: None,
            status: None,
            destination: None,
            source: None,
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CaptureSort {
    StartedAtDesc,
    StartedAtAsc,
}

/// A stored request with the status of the response saved alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEntry {
    pub id: i64,
    pub request: CaptureRequest,
    pub status_code: Option<u16>,
}
