use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::Datelike;
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};

use super::types::{CaCertificate, CaMaterial, CaMaterialPaths, TlsError, TlsErrorKind};

const DEFAULT_CA_VALIDITY_DAYS: u64 = 365;
const DAY: Duration = Duration::from_secs(24 * 3600);

pub fn generate_ca(common_name: &str) -> Result<CaCertificate, TlsError> {
    let mut params = CertificateParams::new(Vec::new());
    params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "sluice");
    params.distinguished_name = dn;

    let now = SystemTime::now();
    if let Some(valid_from) = now.checked_sub(DAY) {
        let (year, month, day) = ymd(valid_from);
        params.not_before = rcgen::date_time_ymd(year, month, day);
    }
    if let Some(valid_until) = now.checked_add(DAY * DEFAULT_CA_VALIDITY_DAYS as u32) {
        let (year, month, day) = ymd(valid_until);
        params.not_after = rcgen::date_time_ymd(year, month, day);
    }

    let cert = Certificate::from_params(params)
        .map_err(|err| TlsError::new(TlsErrorKind::Rcgen, err.to_string()))?;

    let cert_pem = cert
        .serialize_pem()
        .map_err(|err| TlsError::new(TlsErrorKind::Rcgen, err.to_string()))?
        .into_bytes();
    let key_pem = cert.serialize_private_key_pem().into_bytes();

    Ok(CaCertificate {
        material: CaMaterial { cert_pem, key_pem },
        cert,
    })
}

pub fn write_ca_to_dir(
    dir: impl AsRef<Path>,
    material: &CaMaterial,
) -> Result<CaMaterialPaths, TlsError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|err| TlsError::new(TlsErrorKind::Io, err.to_string()))?;

    let paths = CaMaterialPaths::in_dir(dir);
    fs::write(&paths.cert_path, &material.cert_pem)
        .map_err(|err| TlsError::new(TlsErrorKind::Io, err.to_string()))?;
    fs::write(&paths.key_path, &material.key_pem)
        .map_err(|err| TlsError::new(TlsErrorKind::Io, err.to_string()))?;

    Ok(paths)
}

/// Reuses the authority stored in `dir`, or creates and stores a new one.
/// Clients only need to trust the stored certificate once.
pub fn load_or_generate_ca(
    dir: impl AsRef<Path>,
    common_name: &str,
) -> Result<CaCertificate, TlsError> {
    let dir = dir.as_ref();
    let paths = CaMaterialPaths::in_dir(dir);
    if paths.exists() {
        return load_ca(&paths);
    }

    let ca = generate_ca(common_name)?;
    write_ca_to_dir(dir, &ca.material)?;
    Ok(ca)
}

fn load_ca(paths: &CaMaterialPaths) -> Result<CaCertificate, TlsError> {
    let cert_pem = fs::read(&paths.cert_path)
        .map_err(|err| TlsError::new(TlsErrorKind::Io, err.to_string()))?;
    let key_pem = fs::read(&paths.key_path)
        .map_err(|err| TlsError::new(TlsErrorKind::Io, err.to_string()))?;

    let cert_text = std::str::from_utf8(&cert_pem)
        .map_err(|err| TlsError::new(TlsErrorKind::Io, err.to_string()))?;
    let key_text = std::str::from_utf8(&key_pem)
        .map_err(|err| TlsError::new(TlsErrorKind::Io, err.to_string()))?;

    let key_pair = KeyPair::from_pem(key_text)
        .map_err(|err| TlsError::new(TlsErrorKind::Rcgen, err.to_string()))?;
    let params = CertificateParams::from_ca_cert_pem(cert_text, key_pair)
        .map_err(|err| TlsError::new(TlsErrorKind::Rcgen, err.to_string()))?;
    let cert = Certificate::from_params(params)
        .map_err(|err| TlsError::new(TlsErrorKind::Rcgen, err.to_string()))?;

    Ok(CaCertificate {
        material: CaMaterial { cert_pem, key_pem },
        cert,
    })
}

fn ymd(time: SystemTime) -> (i32, u8, u8) {
    let datetime = chrono::DateTime::<chrono::Utc>::from(time);
    (datetime.year(), datetime.month() as u8, datetime.day() as u8)
}
