use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CaMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaMaterialPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl CaMaterialPaths {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            cert_path: dir.join("sluice-ca.pem"),
            key_path: dir.join("sluice-ca-key.pem"),
        }
    }

    pub fn exists(&self) -> bool {
        self.cert_path.is_file() && self.key_path.is_file()
    }
}

/// Signing authority used to mint the certificate presented to clients.
pub struct CaCertificate {
    pub material: CaMaterial,
    pub cert: rcgen::Certificate,
}

/// Certificate and private key presented on the client-facing handshake.
#[derive(Debug, Clone)]
pub struct LeafCertificate {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

#[derive(Debug)]
pub struct TlsError {
    pub kind: TlsErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsErrorKind {
    Rcgen,
    Io,
    OpenSsl,
}

impl TlsError {
    pub fn new(kind: TlsErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TlsError {}
