use std::fs;
use std::net::IpAddr;
use std::path::Path;

use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, IsCa, SanType};

use super::types::{CaCertificate, LeafCertificate, TlsError, TlsErrorKind};

/// Issues a certificate covering every name in `hosts`, signed by `ca`.
/// The first host becomes the subject common name.
pub fn generate_leaf_cert<S: AsRef<str>>(
    hosts: &[S],
    ca: &CaCertificate,
) -> Result<LeafCertificate, TlsError> {
    let Some(first) = hosts.first() else {
        return Err(TlsError::new(
            TlsErrorKind::Rcgen,
            "at least one host name is required",
        ));
    };

    let mut params = CertificateParams::new(Vec::new());
    params.is_ca = IsCa::NoCa;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, first.as_ref());
    params.distinguished_name = dn;

    for host in hosts {
        let host = host.as_ref();
        if let Ok(ip) = host.parse::<IpAddr>() {
            params.subject_alt_names.push(SanType::IpAddress(ip));
        } else {
            params.subject_alt_names.push(SanType::DnsName(host.to_string()));
        }
    }

    let cert = Certificate::from_params(params)
        .map_err(|err| TlsError::new(TlsErrorKind::Rcgen, err.to_string()))?;

    let cert_pem = cert
        .serialize_pem_with_signer(&ca.cert)
        .map_err(|err| TlsError::new(TlsErrorKind::Rcgen, err.to_string()))?
        .into_bytes();
    let key_pem = cert.serialize_private_key_pem().into_bytes();

    Ok(LeafCertificate { cert_pem, key_pem })
}

pub fn read_leaf_cert(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<LeafCertificate, TlsError> {
    let cert_pem = fs::read(cert_path.as_ref()).map_err(|err| {
        TlsError::new(
            TlsErrorKind::Io,
            format!("{}: {err}", cert_path.as_ref().display()),
        )
    })?;
    let key_pem = fs::read(key_path.as_ref()).map_err(|err| {
        TlsError::new(
            TlsErrorKind::Io,
            format!("{}: {err}", key_path.as_ref().display()),
        )
    })?;
    Ok(LeafCertificate { cert_pem, key_pem })
}
