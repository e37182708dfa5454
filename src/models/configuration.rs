use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ttl::Ttl;
use super::validation;
use crate::errors::{AppError, Result};
use crate::vault::SealedPayload;

/// Default and ceiling lifetimes for private CA material.
pub const DEFAULT_CA_MAX_TTL: u64 = 87_600 * 3600;
pub const DEFAULT_CERT_TTL: u64 = 30 * 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationType {
    PrivateCertConfigurationRootCa,
    PrivateCertConfigurationIntermediateCa,
    PrivateCertConfigurationTemplate,
    IamCredentialsConfiguration,
    PublicCertConfigurationCaLetsEncrypt,
    PublicCertConfigurationDnsCloudInternetServices,
    PublicCertConfigurationDnsClassicInfrastructure,
}

/// Buckets sharing a per-instance quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    IamCredentials,
    RootCa,
    IntermediateCa,
    PublicCa,
    DnsProvider,
    Unbounded,
}

impl QuotaKind {
    pub fn limit(&self) -> Option<usize> {
        match self {
            QuotaKind::IamCredentials => Some(1),
            QuotaKind::RootCa
            | QuotaKind::IntermediateCa
            | QuotaKind::PublicCa
            | QuotaKind::DnsProvider => Some(10),
            QuotaKind::Unbounded => None,
        }
    }
}

impl ConfigurationType {
    pub const ALL: [ConfigurationType; 7] = [
        ConfigurationType::PrivateCertConfigurationRootCa,
        ConfigurationType::PrivateCertConfigurationIntermediateCa,
        ConfigurationType::PrivateCertConfigurationTemplate,
        ConfigurationType::IamCredentialsConfiguration,
        ConfigurationType::PublicCertConfigurationCaLetsEncrypt,
        ConfigurationType::PublicCertConfigurationDnsCloudInternetServices,
        ConfigurationType::PublicCertConfigurationDnsClassicInfrastructure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigurationType::PrivateCertConfigurationRootCa => "private_cert_configuration_root_ca",
            ConfigurationType::PrivateCertConfigurationIntermediateCa => {
                "private_cert_configuration_intermediate_ca"
            }
            ConfigurationType::PrivateCertConfigurationTemplate => {
                "private_cert_configuration_template"
            }
            ConfigurationType::IamCredentialsConfiguration => "iam_credentials_configuration",
            ConfigurationType::PublicCertConfigurationCaLetsEncrypt => {
                "public_cert_configuration_ca_lets_encrypt"
            }
            ConfigurationType::PublicCertConfigurationDnsCloudInternetServices => {
                "public_cert_configuration_dns_cloud_internet_services"
            }
            ConfigurationType::PublicCertConfigurationDnsClassicInfrastructure => {
                "public_cert_configuration_dns_classic_infrastructure"
            }
        }
    }

    pub fn quota_kind(&self) -> QuotaKind {
        match self {
            ConfigurationType::IamCredentialsConfiguration => QuotaKind::IamCredentials,
            ConfigurationType::PrivateCertConfigurationRootCa => QuotaKind::RootCa,
            ConfigurationType::PrivateCertConfigurationIntermediateCa => QuotaKind::IntermediateCa,
            ConfigurationType::PublicCertConfigurationCaLetsEncrypt => QuotaKind::PublicCa,
            ConfigurationType::PublicCertConfigurationDnsCloudInternetServices
            | ConfigurationType::PublicCertConfigurationDnsClassicInfrastructure => {
                QuotaKind::DnsProvider
            }
            ConfigurationType::PrivateCertConfigurationTemplate => QuotaKind::Unbounded,
        }
    }

    pub fn is_private_ca(&self) -> bool {
        matches!(
            self,
            ConfigurationType::PrivateCertConfigurationRootCa
                | ConfigurationType::PrivateCertConfigurationIntermediateCa
        )
    }
}

impl fmt::Display for ConfigurationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigurationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        ConfigurationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::validation(format!("unknown config_type '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetsEncryptEnvironment {
    Production,
    Staging,
}

/// A private certificate authority (root or intermediate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaConfig {
    pub common_name: String,
    pub max_ttl: u64,
    /// Root CA that signed this intermediate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    pub certificate: String,
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub certificate_authority: String,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub allow_subdomains: bool,
    #[serde(default)]
    pub allow_any_name: bool,
    pub max_ttl: u64,
    pub ttl: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IamConfig {
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetsEncryptConfig {
    pub lets_encrypt_environment: LetsEncryptEnvironment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lets_encrypt_preferred_chain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CisConfig {
    pub cloud_internet_services_crn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassicConfig {
    pub classic_infrastructure_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "config_type", rename_all = "snake_case")]
pub enum ConfigurationSpec {
    PrivateCertConfigurationRootCa(CaConfig),
    PrivateCertConfigurationIntermediateCa(CaConfig),
    PrivateCertConfigurationTemplate(TemplateConfig),
    IamCredentialsConfiguration(IamConfig),
    PublicCertConfigurationCaLetsEncrypt(LetsEncryptConfig),
    PublicCertConfigurationDnsCloudInternetServices(CisConfig),
    PublicCertConfigurationDnsClassicInfrastructure(ClassicConfig),
}

impl ConfigurationSpec {
    pub fn config_type(&self) -> ConfigurationType {
        match self {
            ConfigurationSpec::PrivateCertConfigurationRootCa(_) => {
                ConfigurationType::PrivateCertConfigurationRootCa
            }
            ConfigurationSpec::PrivateCertConfigurationIntermediateCa(_) => {
                ConfigurationType::PrivateCertConfigurationIntermediateCa
            }
            ConfigurationSpec::PrivateCertConfigurationTemplate(_) => {
                ConfigurationType::PrivateCertConfigurationTemplate
            }
            ConfigurationSpec::IamCredentialsConfiguration(_) => {
                ConfigurationType::IamCredentialsConfiguration
            }
            ConfigurationSpec::PublicCertConfigurationCaLetsEncrypt(_) => {
                ConfigurationType::PublicCertConfigurationCaLetsEncrypt
            }
            ConfigurationSpec::PublicCertConfigurationDnsCloudInternetServices(_) => {
                ConfigurationType::PublicCertConfigurationDnsCloudInternetServices
            }
            ConfigurationSpec::PublicCertConfigurationDnsClassicInfrastructure(_) => {
                ConfigurationType::PublicCertConfigurationDnsClassicInfrastructure
            }
        }
    }

    /// Other configurations this one depends on.
    pub fn references(&self) -> Option<&str> {
        match self {
            ConfigurationSpec::PrivateCertConfigurationIntermediateCa(ca) => ca.issuer.as_deref(),
            ConfigurationSpec::PrivateCertConfigurationTemplate(t) => {
                Some(t.certificate_authority.as_str())
            }
            _ => None,
        }
    }
}

/// Write-only credentials of a configuration, sealed at rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationMaterial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub spec: ConfigurationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed: Option<SealedPayload>,
}

impl Configuration {
    pub fn config_type(&self) -> ConfigurationType {
        self.spec.config_type()
    }

    /// API representation; sealed material never leaves the service.
    pub fn to_json(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("sealed");
        }
        Ok(value)
    }
}

/// Creation request, tagged by `config_type`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigurationPrototype {
    pub name: String,
    #[serde(flatten)]
    pub spec: ConfigurationPrototypeSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "config_type", rename_all = "snake_case")]
pub enum ConfigurationPrototypeSpec {
    PrivateCertConfigurationRootCa {
        common_name: String,
        #[serde(default)]
        max_ttl: Option<Ttl>,
    },
    PrivateCertConfigurationIntermediateCa {
        common_name: String,
        issuer: String,
        #[serde(default)]
        max_ttl: Option<Ttl>,
    },
    PrivateCertConfigurationTemplate {
        certificate_authority: String,
        #[serde(default)]
        allowed_domains: Vec<String>,
        #[serde(default)]
        allow_subdomains: bool,
        #[serde(default)]
        allow_any_name: bool,
        #[serde(default)]
        max_ttl: Option<Ttl>,
        #[serde(default)]
        ttl: Option<Ttl>,
    },
    IamCredentialsConfiguration {
        api_key: String,
        #[serde(default)]
        disabled: bool,
    },
    PublicCertConfigurationCaLetsEncrypt {
        lets_encrypt_environment: LetsEncryptEnvironment,
        lets_encrypt_private_key: String,
        #[serde(default)]
        lets_encrypt_preferred_chain: Option<String>,
    },
    PublicCertConfigurationDnsCloudInternetServices {
        cloud_internet_services_crn: String,
        #[serde(default)]
        cloud_internet_services_apikey: Option<String>,
    },
    PublicCertConfigurationDnsClassicInfrastructure {
        classic_infrastructure_username: String,
        classic_infrastructure_password: String,
    },
}

impl ConfigurationPrototypeSpec {
    pub fn config_type(&self) -> ConfigurationType {
        match self {
            Self::PrivateCertConfigurationRootCa { .. } => {
                ConfigurationType::PrivateCertConfigurationRootCa
            }
            Self::PrivateCertConfigurationIntermediateCa { .. } => {
                ConfigurationType::PrivateCertConfigurationIntermediateCa
            }
            Self::PrivateCertConfigurationTemplate { .. } => {
                ConfigurationType::PrivateCertConfigurationTemplate
            }
            Self::IamCredentialsConfiguration { .. } => {
                ConfigurationType::IamCredentialsConfiguration
            }
            Self::PublicCertConfigurationCaLetsEncrypt { .. } => {
                ConfigurationType::PublicCertConfigurationCaLetsEncrypt
            }
            Self::PublicCertConfigurationDnsCloudInternetServices { .. } => {
                ConfigurationType::PublicCertConfigurationDnsCloudInternetServices
            }
            Self::PublicCertConfigurationDnsClassicInfrastructure { .. } => {
                ConfigurationType::PublicCertConfigurationDnsClassicInfrastructure
            }
        }
    }
}

impl ConfigurationPrototype {
    /// Checks that need no storage access.
    pub fn validate(&self) -> Result<()> {
        validation::configuration_name(&self.name)?;
        match &self.spec {
            ConfigurationPrototypeSpec::PrivateCertConfigurationRootCa { common_name, .. } => {
                require_non_empty("common_name", common_name)
            }
            ConfigurationPrototypeSpec::PrivateCertConfigurationIntermediateCa {
                common_name,
                issuer,
                ..
            } => {
                require_non_empty("common_name", common_name)?;
                require_non_empty("issuer", issuer)
            }
            ConfigurationPrototypeSpec::PrivateCertConfigurationTemplate {
                certificate_authority,
                allowed_domains,
                max_ttl,
                ttl,
                ..
            } => {
                require_non_empty("certificate_authority", certificate_authority)?;
                for d in allowed_domains {
                    validation::domain_name(d)?;
                }
                if let (Some(ttl), Some(max)) = (ttl, max_ttl) {
                    if ttl > max {
                        return Err(AppError::validation("ttl must not exceed max_ttl"));
                    }
                }
                Ok(())
            }
            ConfigurationPrototypeSpec::IamCredentialsConfiguration { api_key, .. } => {
                require_non_empty("api_key", api_key)
            }
            ConfigurationPrototypeSpec::PublicCertConfigurationCaLetsEncrypt {
                lets_encrypt_private_key,
                ..
            } => {
                require_non_empty("lets_encrypt_private_key", lets_encrypt_private_key)?;
                if !lets_encrypt_private_key.contains("PRIVATE KEY-----") {
                    return Err(AppError::validation(
                        "lets_encrypt_private_key must be a PEM encoded private key",
                    ));
                }
                Ok(())
            }
            ConfigurationPrototypeSpec::PublicCertConfigurationDnsCloudInternetServices {
                cloud_internet_services_crn,
                ..
            } => {
                require_non_empty("cloud_internet_services_crn", cloud_internet_services_crn)?;
                if !cloud_internet_services_crn.starts_with("crn:") {
                    return Err(AppError::validation(
                        "cloud_internet_services_crn must be a CRN",
                    ));
                }
                Ok(())
            }
            ConfigurationPrototypeSpec::PublicCertConfigurationDnsClassicInfrastructure {
                classic_infrastructure_username,
                classic_infrastructure_password,
            } => {
                require_non_empty(
                    "classic_infrastructure_username",
                    classic_infrastructure_username,
                )?;
                require_non_empty(
                    "classic_infrastructure_password",
                    classic_infrastructure_password,
                )
            }
        }
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(())
}
