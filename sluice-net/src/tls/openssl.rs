use openssl::pkey::PKey;
use openssl::ssl::{
    SslAcceptor, SslConnector, SslContextBuilder, SslMethod, SslOptions, SslVerifyMode,
};
use openssl::x509::X509;

use super::types::{LeafCertificate, TlsError, TlsErrorKind};

#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub allow_legacy: bool,
    /// Check the upstream server's certificate chain and host name.
    pub verify_upstream: bool,
}

/// Server-side context presenting `leaf` to intercepted clients.
pub fn build_acceptor(config: &TlsConfig, leaf: &LeafCertificate) -> Result<SslAcceptor, TlsError> {
    let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls())
        .map_err(|err| TlsError::new(TlsErrorKind::OpenSsl, err.to_string()))?;

    apply_legacy(&mut builder, config.allow_legacy)?;

    let cert = X509::from_pem(&leaf.cert_pem)
        .map_err(|err| TlsError::new(TlsErrorKind::OpenSsl, err.to_string()))?;
    let key = PKey::private_key_from_pem(&leaf.key_pem)
        .map_err(|err| TlsError::new(TlsErrorKind::OpenSsl, err.to_string()))?;

    builder
        .set_certificate(&cert)
        .map_err(|err| TlsError::new(TlsErrorKind::OpenSsl, err.to_string()))?;
    builder
        .set_private_key(&key)
        .map_err(|err| TlsError::new(TlsErrorKind::OpenSsl, err.to_string()))?;
    builder
        .check_private_key()
        .map_err(|err| TlsError::new(TlsErrorKind::OpenSsl, err.to_string()))?;

    builder.set_verify(SslVerifyMode::NONE);

    Ok(builder.build())
}

/// Client-side context used to reach the real server.
pub fn build_connector(config: &TlsConfig) -> Result<SslConnector, TlsError> {
    let mut builder = SslConnector::builder(SslMethod::tls())
        .map_err(|err| TlsError::new(TlsErrorKind::OpenSsl, err.to_string()))?;

    apply_legacy(&mut builder, config.allow_legacy)?;

    if config.verify_upstream {
        builder.set_verify(SslVerifyMode::PEER);
    } else {
        builder.set_verify(SslVerifyMode::NONE);
    }

    Ok(builder.build())
}

fn apply_legacy(builder: &mut SslContextBuilder, allow_legacy: bool) -> Result<(), TlsError> {
    if allow_legacy {
        builder.set_options(SslOptions::NO_TICKET);
        builder.clear_options(SslOptions::NO_SSLV2 | SslOptions::NO_SSLV3);
        builder
            .set_cipher_list("ALL:@SECLEVEL=0")
            .map_err(|err| TlsError::new(TlsErrorKind::OpenSsl, err.to_string()))?;
    } else {
        builder.set_options(SslOptions::NO_SSLV2 | SslOptions::NO_SSLV3);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{TlsConfig, build_acceptor, build_connector};
    use crate::tls::{generate_ca, generate_leaf_cert};

    #[test]
    fn builds_contexts_for_both_sides() {
        let ca = generate_ca("test authority").unwrap();
        let leaf = generate_leaf_cert(&["localhost"], &ca).unwrap();
        let config = TlsConfig::default();

        assert!(build_acceptor(&config, &leaf).is_ok());
        assert!(build_connector(&config).is_ok());
    }

    #[test]
    fn legacy_mode_builds() {
        let config = TlsConfig {
            allow_legacy: true,
            verify_upstream: false,
        };
        assert!(build_connector(&config).is_ok());
    }
}
