//! Private CA material and leaf certificate issuance.
//!
//! Issuers are rebuilt from their stored subject, validity, serial and key:
//! a certificate signed by the rebuilt issuer carries the same issuer name
//! and authority key identifier as one signed by the original.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};
use time::OffsetDateTime;

use crate::errors::{AppError, Result};
use crate::models::configuration::{CaConfig, TemplateConfig};

/// Upper bound on any certificate lifetime (100 years).
const MAX_VALIDITY_SECS: i64 = 100 * 365 * 86_400;

/// A CA certificate together with its PEM private key.
#[derive(Debug, Clone)]
pub struct IssuedCa {
    pub config: CaConfig,
    pub private_key: String,
}

/// What a private certificate secret asks for.
#[derive(Debug, Clone)]
pub struct LeafRequest<'a> {
    pub common_name: &'a str,
    pub alt_names: &'a [String],
    pub ttl: u64,
    /// PEM key of the previous version, reused when keys are not rotated.
    pub reuse_key: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct IssuedCert {
    pub certificate: String,
    pub private_key: String,
    pub issuing_ca: String,
    pub ca_chain: Vec<String>,
    pub serial_number: String,
    pub issuer: String,
    pub not_after: DateTime<Utc>,
}

fn pki_err(e: rcgen::Error) -> AppError {
    AppError::Internal(anyhow::anyhow!("certificate generation failed: {e}"))
}

fn to_offset(dt: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("timestamp out of range: {e}")))
}

fn random_serial() -> Vec<u8> {
    let mut serial = vec![0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut serial);
    // Keep it positive in DER.
    serial[0] &= 0x7f;
    serial
}

fn format_serial(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn parse_serial(serial: &str) -> Result<Vec<u8>> {
    hex::decode(serial.replace(':', ""))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("stored serial number is malformed: {e}")))
}

fn ca_params(
    common_name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    serial: &[u8],
) -> Result<CertificateParams> {
    let mut params = CertificateParams::new(Vec::<String>::new()).map_err(pki_err)?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = to_offset(not_before)?;
    params.not_after = to_offset(not_after)?;
    params.serial_number = Some(SerialNumber::from_slice(serial));
    Ok(params)
}

/// Rebuild a signing handle for a stored CA.
fn issuer(ca: &CaConfig, key_pem: &str) -> Result<(Certificate, KeyPair)> {
    let key = KeyPair::from_pem(key_pem).map_err(pki_err)?;
    let serial = parse_serial(&ca.serial_number)?;
    let cert = ca_params(&ca.common_name, ca.not_before, ca.not_after, &serial)?
        .self_signed(&key)
        .map_err(pki_err)?;
    Ok((cert, key))
}

fn validity(now: DateTime<Utc>, ttl: u64, cap: Option<DateTime<Utc>>) -> (DateTime<Utc>, DateTime<Utc>) {
    // Backdate slightly to tolerate clock skew between parties.
    let not_before = now - Duration::minutes(1);
    let secs = i64::try_from(ttl).unwrap_or(i64::MAX).min(MAX_VALIDITY_SECS);
    let requested = now + Duration::seconds(secs);
    let not_after = match cap {
        Some(cap) if cap < requested => cap,
        _ => requested,
    };
    (not_before, not_after)
}

pub fn create_root_ca(common_name: &str, max_ttl: u64, now: DateTime<Utc>) -> Result<IssuedCa> {
    let key = KeyPair::generate().map_err(pki_err)?;
    let serial = random_serial();
    let (not_before, not_after) = validity(now, max_ttl, None);
    let cert = ca_params(common_name, not_before, not_after, &serial)?
        .self_signed(&key)
        .map_err(pki_err)?;

    Ok(IssuedCa {
        config: CaConfig {
            common_name: common_name.to_string(),
            max_ttl,
            issuer: None,
            certificate: cert.pem(),
            serial_number: format_serial(&serial),
            not_before,
            not_after,
        },
        private_key: key.serialize_pem(),
    })
}

/// Create an intermediate CA signed by `parent`. Its validity never
/// outlives the parent's.
pub fn create_intermediate_ca(
    common_name: &str,
    max_ttl: u64,
    parent_name: &str,
    parent: &CaConfig,
    parent_key_pem: &str,
    now: DateTime<Utc>,
) -> Result<IssuedCa> {
    if parent.not_after <= now {
        return Err(AppError::validation(format!(
            "issuer '{parent_name}' has expired"
        )));
    }
    let (parent_cert, parent_key) = issuer(parent, parent_key_pem)?;
    let key = KeyPair::generate().map_err(pki_err)?;
    let serial = random_serial();
    let (not_before, not_after) = validity(now, max_ttl, Some(parent.not_after));
    let cert = ca_params(common_name, not_before, not_after, &serial)?
        .signed_by(&key, &parent_cert, &parent_key)
        .map_err(pki_err)?;

    Ok(IssuedCa {
        config: CaConfig {
            common_name: common_name.to_string(),
            max_ttl,
            issuer: Some(parent_name.to_string()),
            certificate: cert.pem(),
            serial_number: format_serial(&serial),
            not_before,
            not_after,
        },
        private_key: key.serialize_pem(),
    })
}

/// Reject names the template does not allow.
pub fn check_names(template: &TemplateConfig, common_name: &str, alt_names: &[String]) -> Result<()> {
    if template.allow_any_name {
        return Ok(());
    }
    for name in std::iter::once(common_name).chain(alt_names.iter().map(String::as_str)) {
        let name = name.to_ascii_lowercase();
        let allowed = template.allowed_domains.iter().any(|domain| {
            let domain = domain.to_ascii_lowercase();
            name == domain || (template.allow_subdomains && name.ends_with(&format!(".{domain}")))
        });
        if !allowed {
            return Err(AppError::validation(format!(
                "name '{name}' is not allowed by the certificate template"
            )));
        }
    }
    Ok(())
}

/// The TTL a certificate is issued with: the request (or the template
/// default) capped by the template's `max_ttl`.
pub fn effective_ttl(template: &TemplateConfig, requested: Option<u64>) -> u64 {
    requested.unwrap_or(template.ttl).min(template.max_ttl)
}

/// Issue a leaf certificate signed by `ca`. `ca_chain` lists the CA
/// certificates from the issuing CA up to the root.
pub fn issue_leaf(
    ca_name: &str,
    ca: &CaConfig,
    ca_key_pem: &str,
    ca_chain: Vec<String>,
    request: &LeafRequest<'_>,
    now: DateTime<Utc>,
) -> Result<IssuedCert> {
    if ca.not_after <= now {
        return Err(AppError::validation(format!(
            "certificate authority '{ca_name}' has expired"
        )));
    }
    let (ca_cert, ca_key) = issuer(ca, ca_key_pem)?;
    let key = match request.reuse_key {
        Some(pem) => KeyPair::from_pem(pem).map_err(pki_err)?,
        None => KeyPair::generate().map_err(pki_err)?,
    };

    let mut sans: Vec<String> = vec![request.common_name.to_string()];
    for name in request.alt_names {
        if !sans.contains(name) {
            sans.push(name.clone());
        }
    }
    let mut params = CertificateParams::new(sans).map_err(|e| {
        AppError::validation(format!("certificate names are not valid DNS names: {e}"))
    })?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, request.common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.use_authority_key_identifier_extension = true;

    let serial = random_serial();
    params.serial_number = Some(SerialNumber::from_slice(&serial));
    let (not_before, not_after) = validity(now, request.ttl, Some(ca.not_after));
    params.not_before = to_offset(not_before)?;
    params.not_after = to_offset(not_after)?;

    let cert = params
        .signed_by(&key, &ca_cert, &ca_key)
        .map_err(pki_err)?;

    Ok(IssuedCert {
        certificate: cert.pem(),
        private_key: key.serialize_pem(),
        issuing_ca: ca.certificate.clone(),
        ca_chain,
        serial_number: format_serial(&serial),
        issuer: ca.common_name.clone(),
        not_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(allowed: &[&str], subdomains: bool) -> TemplateConfig {
        TemplateConfig {
            certificate_authority: "root".into(),
            allowed_domains: allowed.iter().map(|s| s.to_string()).collect(),
            allow_subdomains: subdomains,
            allow_any_name: false,
            max_ttl: 3600,
            ttl: 600,
        }
    }

    #[test]
    fn test_root_and_intermediate_chain() {
        let now = Utc::now();
        let root = create_root_ca("Example Root", 86_400 * 365, now).unwrap();
        assert!(root.config.certificate.contains("BEGIN CERTIFICATE"));
        assert!(root.private_key.contains("PRIVATE KEY"));
        assert!(root.config.issuer.is_none());

        let inter = create_intermediate_ca(
            "Example Intermediate",
            86_400 * 3650,
            "root",
            &root.config,
            &root.private_key,
            now,
        )
        .unwrap();
        assert_eq!(inter.config.issuer.as_deref(), Some("root"));
        // Capped by the parent.
        assert!(inter.config.not_after <= root.config.not_after);
    }

    #[test]
    fn test_leaf_issuance_and_key_reuse() {
        let now = Utc::now();
        let root = create_root_ca("Example Root", 86_400 * 30, now).unwrap();
        let alt = vec!["api.example.com".to_string()];
        let request = LeafRequest {
            common_name: "www.example.com",
            alt_names: &alt,
            ttl: 3600,
            reuse_key: None,
        };
        let first = issue_leaf(
            "root",
            &root.config,
            &root.private_key,
            vec![root.config.certificate.clone()],
            &request,
            now,
        )
        .unwrap();
        assert!(first.certificate.contains("BEGIN CERTIFICATE"));
        assert_eq!(first.issuer, "Example Root");
        assert_eq!(first.ca_chain.len(), 1);

        let reused = issue_leaf(
            "root",
            &root.config,
            &root.private_key,
            vec![],
            &LeafRequest {
                reuse_key: Some(&first.private_key),
                ..request.clone()
            },
            now,
        )
        .unwrap();
        assert_eq!(reused.private_key, first.private_key);
        assert_ne!(reused.serial_number, first.serial_number);

        let rotated = issue_leaf("root", &root.config, &root.private_key, vec![], &request, now)
            .unwrap();
        assert_ne!(rotated.private_key, first.private_key);
    }

    #[test]
    fn test_leaf_never_outlives_ca() {
        let now = Utc::now();
        let root = create_root_ca("Short Root", 600, now).unwrap();
        let request = LeafRequest {
            common_name: "svc.internal",
            alt_names: &[],
            ttl: 86_400,
            reuse_key: None,
        };
        let leaf = issue_leaf("root", &root.config, &root.private_key, vec![], &request, now).unwrap();
        assert!(leaf.not_after <= root.config.not_after);
    }

    #[test]
    fn test_template_name_rules() {
        let t = template(&["example.com"], true);
        assert!(check_names(&t, "example.com", &[]).is_ok());
        assert!(check_names(&t, "a.b.example.com", &[]).is_ok());
        assert!(check_names(&t, "example.org", &[]).is_err());
        assert!(check_names(&t, "badexample.com", &[]).is_err());

        let strict = template(&["example.com"], false);
        assert!(check_names(&strict, "www.example.com", &[]).is_err());
        assert!(check_names(&strict, "example.com", &["www.example.com".into()]).is_err());
    }

    #[test]
    fn test_ttl_capped_by_template() {
        let t = template(&[], false);
        assert_eq!(effective_ttl(&t, None), 600);
        assert_eq!(effective_ttl(&t, Some(7200)), 3600);
        assert_eq!(effective_ttl(&t, Some(60)), 60);
    }
}
