use crate::{Error, Result};
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, SanType};

/// Validity of the generated certificates
pub const VALIDITY_DAYS: i64 = 180;

#[derive(Clone, Debug)]
pub struct SelfSigned {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Self signed certificate for a public host, `organization` names the owner
pub fn self_signed(host: &str, organization: &str) -> Result<SelfSigned> {
    let mut params = CertificateParams::default();
    params.not_before = chrono::Utc::now();
    params.not_after = chrono::Utc::now() + chrono::Duration::days(VALIDITY_DAYS);
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, organization);
    distinguished_name.push(DnType::CommonName, host);
    params.distinguished_name = distinguished_name;
    params.subject_alt_names = vec![SanType::DnsName(host.to_string())];

    let cert = Certificate::from_params(params)
        .map_err(|e| Error::Build(format!("certificate for {host}"), e.to_string()))?;
    let cert_pem = cert
        .serialize_pem()
        .map_err(|e| Error::Build(format!("certificate for {host}"), e.to_string()))?;
    Ok(SelfSigned {
        cert_pem,
        key_pem: cert.serialize_private_key_pem(),
    })
}
