use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy configuration error: {0}")]
    Config(String),
    #[error("proxy runtime error: {0}")]
    Runtime(String),
    #[error("proxy IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("original destination unavailable: {0}")]
    Destination(String),
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS handshake with {peer} failed: {message}")]
    Handshake { peer: &'static str, message: String },
    #[error("HTTP protocol error from {peer}: {message}")]
    Protocol { peer: &'static str, message: String },
}
