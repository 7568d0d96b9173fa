use std::path::Path;
use std::pin::Pin;

use openssl::ssl::{Ssl, SslAcceptor, SslConnector};
use sluice_net::{
    LeafCertificate, TlsConfig, build_acceptor, build_connector, generate_leaf_cert,
    load_or_generate_ca, read_leaf_cert,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_openssl::SslStream;
use tracing::info;

use crate::config::TlsMitmConfig;
use crate::error::ProxyError;

/// The two TLS contexts shared by every intercepted connection: one that
/// answers the client with the substitute identity and one that dials the
/// real server.
pub struct InterceptionContexts {
    server: SslAcceptor,
    client: SslConnector,
}

impl InterceptionContexts {
    pub fn new(config: &TlsConfig, identity: &LeafCertificate) -> Result<Self, ProxyError> {
        let server = build_acceptor(config, identity)
            .map_err(|err| ProxyError::Config(err.to_string()))?;
        let client = build_connector(config).map_err(|err| ProxyError::Config(err.to_string()))?;
        Ok(Self { server, client })
    }

    /// Builds the contexts from configuration. Relative paths are resolved
    /// against `base_dir`.
    pub fn from_config(config: &TlsMitmConfig, base_dir: &Path) -> Result<Self, ProxyError> {
        let identity = load_identity(config, base_dir)?;
        let tls = TlsConfig {
            allow_legacy: config.allow_legacy,
            verify_upstream: config.verify_upstream,
        };
        Self::new(&tls, &identity)
    }

    /// Terminates the client's handshake.
    pub async fn accept<S>(&self, stream: S) -> Result<SslStream<S>, ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ssl = Ssl::new(self.server.context()).map_err(|err| handshake("client", err))?;
        let mut tls = SslStream::new(ssl, stream).map_err(|err| handshake("client", err))?;
        Pin::new(&mut tls)
            .accept()
            .await
            .map_err(|err| handshake("client", err))?;
        Ok(tls)
    }

    /// Originates a handshake to the real server, offering `server_name`
    /// as SNI when known.
    pub async fn connect<S>(
        &self,
        stream: S,
        server_name: Option<&str>,
    ) -> Result<SslStream<S>, ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut configuration = self
            .client
            .configure()
            .map_err(|err| handshake("server", err))?;
        let ssl = match server_name {
            Some(name) => configuration
                .into_ssl(name)
                .map_err(|err| handshake("server", err))?,
            None => {
                configuration.set_use_server_name_indication(false);
                configuration.set_verify_hostname(false);
                configuration
                    .into_ssl("")
                    .map_err(|err| handshake("server", err))?
            }
        };
        let mut tls = SslStream::new(ssl, stream).map_err(|err| handshake("server", err))?;
        Pin::new(&mut tls)
            .connect()
            .await
            .map_err(|err| handshake("server", err))?;
        Ok(tls)
    }
}

fn load_identity(config: &TlsMitmConfig, base_dir: &Path) -> Result<LeafCertificate, ProxyError> {
    if let (Some(cert), Some(key)) = (&config.identity_cert, &config.identity_key) {
        let identity = read_leaf_cert(base_dir.join(cert), base_dir.join(key))
            .map_err(|err| ProxyError::Config(err.to_string()))?;
        info!(cert = %cert, "loaded substitute identity");
        return Ok(identity);
    }

    let ca_dir = base_dir.join(&config.ca_cert_dir);
    let ca = load_or_generate_ca(&ca_dir, &config.ca_common_name)
        .map_err(|err| ProxyError::Config(err.to_string()))?;
    let identity = generate_leaf_cert(&config.identity_hosts, &ca)
        .map_err(|err| ProxyError::Config(err.to_string()))?;
    info!(
        ca_dir = %ca_dir.display(),
        hosts = ?config.identity_hosts,
        "issued substitute identity"
    );
    Ok(identity)
}

fn handshake(peer: &'static str, err: impl std::fmt::Display) -> ProxyError {
    ProxyError::Handshake {
        peer,
        message: err.to_string(),
    }
}
