use std::path::Path;

use serde::{Deserialize, Serialize};
use sluice_net::Limits;
use sluice_storage::{BodyLimits, CaptureWorkerConfig};

use crate::error::ProxyError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen: ListenConfig,
    pub tls: TlsMitmConfig,
    pub http: HttpConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TlsMitmConfig {
    pub enabled: bool,
    /// Destination ports whose traffic is intercepted as TLS.
    pub https_ports: Vec<u16>,
    pub allow_legacy: bool,
    pub verify_upstream: bool,
    pub ca_common_name: String,
    pub ca_cert_dir: String,
    /// Names covered by the generated substitute certificate.
    pub identity_hosts: Vec<String>,
    pub identity_cert: Option<String>,
    pub identity_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureConfig {
    pub request_max_bytes: usize,
    pub response_max_bytes: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_queue_size: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for TlsMitmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            https_ports: vec![443],
            allow_legacy: false,
            verify_upstream: false,
            ca_common_name: "sluice interception CA".to_string(),
            ca_cert_dir: "certs".to_string(),
            identity_hosts: vec!["localhost".to_string()],
            identity_cert: None,
            identity_key: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_header_bytes: limits.max_header_bytes,
            max_body_bytes: limits.max_body_bytes,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let limits = BodyLimits::default();
        let worker = CaptureWorkerConfig::default();
        Self {
            request_max_bytes: limits.request_max_bytes,
            response_max_bytes: limits.response_max_bytes,
            batch_size: worker.batch_size,
            flush_interval_ms: worker.flush_interval_ms,
            max_queue_size: worker.max_queue_size,
        }
    }
}

impl ProxyConfig {
    pub fn load_or_create(path: &Path) -> Result<Self, ProxyError> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let config: Self =
                toml::from_str(&raw).map_err(|err| ProxyError::Config(err.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ProxyError> {
        let contents =
            toml::to_string_pretty(self).map_err(|err| ProxyError::Config(err.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.listen.host.trim().is_empty() {
            return Err(ProxyError::Config("listen.host cannot be empty".to_string()));
        }
        if self.tls.enabled && self.tls.https_ports.is_empty() {
            return Err(ProxyError::Config(
                "tls.https_ports cannot be empty while tls is enabled".to_string(),
            ));
        }
        if self.tls.identity_cert.is_some() != self.tls.identity_key.is_some() {
            return Err(ProxyError::Config(
                "tls.identity_cert and tls.identity_key must be set together".to_string(),
            ));
        }
        if self.tls.enabled
            && self.tls.identity_cert.is_none()
            && self.tls.identity_hosts.is_empty()
        {
            return Err(ProxyError::Config(
                "tls.identity_hosts cannot be empty without an identity certificate".to_string(),
            ));
        }
        if self.http.max_header_bytes == 0 || self.http.max_body_bytes == 0 {
            return Err(ProxyError::Config("http limits must be non-zero".to_string()));
        }
        if self.capture.batch_size == 0 || self.capture.max_queue_size == 0 {
            return Err(ProxyError::Config(
                "capture.batch_size and capture.max_queue_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen.host, self.listen.port)
    }

    pub fn is_https_port(&self, port: u16) -> bool {
        self.tls.https_ports.contains(&port)
    }

    pub fn parser_limits(&self) -> Limits {
        Limits {
            max_header_bytes: self.http.max_header_bytes,
            max_body_bytes: self.http.max_body_bytes,
        }
    }

    pub fn body_limits(&self) -> BodyLimits {
        BodyLimits {
            request_max_bytes: self.capture.request_max_bytes,
            response_max_bytes: self.capture.response_max_bytes,
        }
    }

    pub fn worker_config(&self) -> CaptureWorkerConfig {
        CaptureWorkerConfig {
            batch_size: self.capture.batch_size,
            flush_interval_ms: self.capture.flush_interval_ms,
            max_queue_size: self.capture.max_queue_size,
        }
    }
}
