//! Configuration/engine registry: turns configuration prototypes into stored
//! configurations (generating CA material where needed) and produces the
//! type-specific material of generated secret versions.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::{AppError, Result};
use crate::models::configuration::{
    CaConfig, CisConfig, ClassicConfig, Configuration, ConfigurationMaterial,
    ConfigurationPrototype, ConfigurationPrototypeSpec, ConfigurationSpec, ConfigurationType,
    IamConfig, LetsEncryptConfig, TemplateConfig, DEFAULT_CA_MAX_TTL, DEFAULT_CERT_TTL,
};
use crate::models::secret::{SecretKind, SecretPayload};
use crate::store::Repository;
use crate::vault::VaultCrypto;

pub mod iam;
pub mod password;
pub mod pki;

/// Longest issuer chain followed when assembling `ca_chain`.
const MAX_CHAIN_DEPTH: usize = 8;

/// Material for a new version, plus the secret metadata it implies
/// (a new `api_key_id`, certificate serial and expiry).
#[derive(Debug, Clone)]
pub struct Generated {
    pub payload: SecretPayload,
    pub kind: SecretKind,
}

pub struct EngineRegistry {
    repo: Arc<dyn Repository>,
    crypto: Arc<VaultCrypto>,
}

impl EngineRegistry {
    pub fn new(repo: Arc<dyn Repository>, crypto: Arc<VaultCrypto>) -> Self {
        Self { repo, crypto }
    }

    pub async fn configuration(&self, name: &str) -> Result<Configuration> {
        self.repo
            .get_configuration(name)
            .await?
            .ok_or_else(|| AppError::not_found(format!("configuration '{name}'")))
    }

    /// A configuration referenced from a request body: a missing one is the
    /// caller's mistake, not a missing resource.
    async fn referenced(&self, field: &str, name: &str) -> Result<Configuration> {
        self.repo.get_configuration(name).await?.ok_or_else(|| {
            AppError::validation(format!("{field} '{name}' does not exist"))
        })
    }

    pub fn material(&self, config: &Configuration) -> Result<ConfigurationMaterial> {
        match &config.sealed {
            Some(sealed) => Ok(self.crypto.open_json(sealed)?),
            None => Ok(ConfigurationMaterial::default()),
        }
    }

    /// QuotaExceeded when the bucket `config_type` belongs to is full.
    pub async fn check_quota(&self, config_type: ConfigurationType) -> Result<()> {
        let kind = config_type.quota_kind();
        let Some(limit) = kind.limit() else {
            return Ok(());
        };
        let bucket: Vec<ConfigurationType> = ConfigurationType::ALL
            .into_iter()
            .filter(|t| t.quota_kind() == kind)
            .collect();
        let used = self.repo.count_configurations(&bucket).await?;
        if used as usize >= limit {
            return Err(AppError::quota(format!(
                "at most {limit} configuration(s) of kind {config_type} are allowed per instance"
            )));
        }
        Ok(())
    }

    /// Build the stored form of a new configuration. CA kinds generate their
    /// key pair and certificate here.
    pub async fn build_configuration(
        &self,
        proto: ConfigurationPrototype,
        now: DateTime<Utc>,
    ) -> Result<Configuration> {
        let mut material = ConfigurationMaterial::default();
        let spec = match proto.spec {
            ConfigurationPrototypeSpec::PrivateCertConfigurationRootCa {
                common_name,
                max_ttl,
            } => {
                let max_ttl = max_ttl.map_or(DEFAULT_CA_MAX_TTL, |t| t.seconds());
                let issued = pki::create_root_ca(&common_name, max_ttl, now)?;
                material.private_key = Some(issued.private_key);
                ConfigurationSpec::PrivateCertConfigurationRootCa(issued.config)
            }
            ConfigurationPrototypeSpec::PrivateCertConfigurationIntermediateCa {
                common_name,
                issuer,
                max_ttl,
            } => {
                let parent = self.referenced("issuer", &issuer).await?;
                let ConfigurationSpec::PrivateCertConfigurationRootCa(parent_ca) = &parent.spec
                else {
                    return Err(AppError::validation(format!(
                        "issuer '{issuer}' is not a private_cert_configuration_root_ca"
                    )));
                };
                let parent_key = self.ca_key(&parent)?;
                let max_ttl = max_ttl.map_or(parent_ca.max_ttl, |t| t.seconds());
                let issued = pki::create_intermediate_ca(
                    &common_name,
                    max_ttl,
                    &issuer,
                    parent_ca,
                    &parent_key,
                    now,
                )?;
                material.private_key = Some(issued.private_key);
                ConfigurationSpec::PrivateCertConfigurationIntermediateCa(issued.config)
            }
            ConfigurationPrototypeSpec::PrivateCertConfigurationTemplate {
                certificate_authority,
                allowed_domains,
                allow_subdomains,
                allow_any_name,
                max_ttl,
                ttl,
            } => {
                let ca = self
                    .referenced("certificate_authority", &certificate_authority)
                    .await?;
                let ca_config = ca_of(&ca).ok_or_else(|| {
                    AppError::validation(format!(
                        "certificate_authority '{certificate_authority}' is not a private CA configuration"
                    ))
                })?;
                if !allow_any_name && allowed_domains.is_empty() {
                    return Err(AppError::validation(
                        "allowed_domains is required unless allow_any_name is true",
                    ));
                }
                let max_ttl = max_ttl
                    .map_or(ca_config.max_ttl, |t| t.seconds())
                    .min(ca_config.max_ttl);
                let ttl = ttl.map_or(DEFAULT_CERT_TTL, |t| t.seconds()).min(max_ttl);
                ConfigurationSpec::PrivateCertConfigurationTemplate(TemplateConfig {
                    certificate_authority,
                    allowed_domains,
                    allow_subdomains,
                    allow_any_name,
                    max_ttl,
                    ttl,
                })
            }
            ConfigurationPrototypeSpec::IamCredentialsConfiguration { api_key, disabled } => {
                material.api_key = Some(api_key);
                ConfigurationSpec::IamCredentialsConfiguration(IamConfig { disabled })
            }
            ConfigurationPrototypeSpec::PublicCertConfigurationCaLetsEncrypt {
                lets_encrypt_environment,
                lets_encrypt_private_key,
                lets_encrypt_preferred_chain,
            } => {
                material.private_key = Some(lets_encrypt_private_key);
                ConfigurationSpec::PublicCertConfigurationCaLetsEncrypt(LetsEncryptConfig {
                    lets_encrypt_environment,
                    lets_encrypt_preferred_chain,
                })
            }
            ConfigurationPrototypeSpec::PublicCertConfigurationDnsCloudInternetServices {
                cloud_internet_services_crn,
                cloud_internet_services_apikey,
            } => {
                material.api_key = cloud_internet_services_apikey;
                ConfigurationSpec::PublicCertConfigurationDnsCloudInternetServices(CisConfig {
                    cloud_internet_services_crn,
                })
            }
            ConfigurationPrototypeSpec::PublicCertConfigurationDnsClassicInfrastructure {
                classic_infrastructure_username,
                classic_infrastructure_password,
            } => {
                material.password = Some(classic_infrastructure_password);
                ConfigurationSpec::PublicCertConfigurationDnsClassicInfrastructure(ClassicConfig {
                    classic_infrastructure_username,
                })
            }
        };

        Ok(Configuration {
            name: proto.name,
            created_at: now,
            updated_at: now,
            spec,
            sealed: self.seal_material(&material)?,
        })
    }

    pub fn seal_material(
        &self,
        material: &ConfigurationMaterial,
    ) -> Result<Option<crate::vault::SealedPayload>> {
        if material == &ConfigurationMaterial::default() {
            return Ok(None);
        }
        Ok(Some(self.crypto.seal_json(material)?))
    }

    fn ca_key(&self, ca: &Configuration) -> Result<String> {
        self.material(ca)?.private_key.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "certificate authority '{}' has no stored private key",
                ca.name
            ))
        })
    }

    /// CA certificates from `name` up to its root.
    async fn chain(&self, ca: &Configuration) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut current = ca.clone();
        for _ in 0..MAX_CHAIN_DEPTH {
            let Some(config) = ca_of(&current) else {
                break;
            };
            chain.push(config.certificate.clone());
            match &config.issuer {
                Some(parent) => current = self.configuration(parent).await?,
                None => break,
            }
        }
        Ok(chain)
    }

    /// `max_ttl` of a private CA configuration. Templates never exceed it.
    pub async fn ca_max_ttl(&self, name: &str) -> Result<u64> {
        let ca = self.referenced("certificate_authority", name).await?;
        ca_of(&ca).map(|c| c.max_ttl).ok_or_else(|| {
            AppError::validation(format!(
                "certificate_authority '{name}' is not a private CA configuration"
            ))
        })
    }

    /// Resolve a certificate template for a private certificate request.
    pub async fn template(&self, name: &str) -> Result<TemplateConfig> {
        let config = self.referenced("certificate_template", name).await?;
        match config.spec {
            ConfigurationSpec::PrivateCertConfigurationTemplate(t) => Ok(t),
            _ => Err(AppError::validation(format!(
                "certificate_template '{name}' is not a private_cert_configuration_template"
            ))),
        }
    }

    /// The IAM credentials configuration, by name or the instance's only one.
    pub async fn iam_configuration(&self, name: Option<&str>) -> Result<Configuration> {
        let config = match name {
            Some(name) => self.referenced("configuration", name).await?,
            None => {
                let filter = crate::store::ConfigurationFilter {
                    config_types: vec![ConfigurationType::IamCredentialsConfiguration],
                    search: None,
                };
                let (mut found, _) = self
                    .repo
                    .list_configurations(&filter, crate::models::pagination::Window::all())
                    .await?;
                found.pop().ok_or_else(|| {
                    AppError::validation(
                        "an iam_credentials_configuration must exist before IAM credentials can be created",
                    )
                })?
            }
        };
        if config.config_type() != ConfigurationType::IamCredentialsConfiguration {
            return Err(AppError::validation(format!(
                "configuration '{}' is not an iam_credentials_configuration",
                config.name
            )));
        }
        Ok(config)
    }

    /// Produce the material of a new version for a generated secret type.
    /// `previous` is the decrypted current payload, used for key reuse.
    pub async fn generate(
        &self,
        kind: &SecretKind,
        rotate_keys: bool,
        previous: Option<&SecretPayload>,
        now: DateTime<Utc>,
    ) -> Result<Generated> {
        match kind {
            SecretKind::UsernamePassword {
                username,
                password_generation_policy,
            } => Ok(Generated {
                payload: SecretPayload::UsernamePassword {
                    username: username.clone(),
                    password: password::generate(password_generation_policy),
                },
                kind: kind.clone(),
            }),
            SecretKind::IamCredentials {
                configuration,
                service_id,
                access_groups,
                ttl,
                reuse_api_key,
                api_key_expires_at,
                ..
            } => {
                let config = self.iam_configuration(Some(configuration)).await?;
                // keep the current key while its ttl lasts, unless asked not to
                let reused = match (previous, *api_key_expires_at) {
                    (Some(SecretPayload::IamCredentials { api_key_id, api_key }), Some(expires))
                        if *reuse_api_key && !rotate_keys && expires > now =>
                    {
                        let key = iam::IssuedApiKey {
                            api_key_id: api_key_id.clone(),
                            api_key: api_key.clone(),
                        };
                        Some((key, expires))
                    }
                    _ => None,
                };
                let (issued, expires) = match reused {
                    Some(found) => found,
                    None => (iam::mint(&config)?, iam::expires_at(*ttl, now)),
                };
                Ok(Generated {
                    payload: SecretPayload::IamCredentials {
                        api_key_id: issued.api_key_id.clone(),
                        api_key: issued.api_key,
                    },
                    kind: SecretKind::IamCredentials {
                        configuration: configuration.clone(),
                        service_id: service_id.clone(),
                        access_groups: access_groups.clone(),
                        ttl: *ttl,
                        reuse_api_key: *reuse_api_key,
                        api_key_id: Some(issued.api_key_id),
                        api_key_expires_at: Some(expires),
                    },
                })
            }
            SecretKind::PrivateCert {
                certificate_template,
                common_name,
                alt_names,
                ttl,
                ..
            } => {
                let template = self.template(certificate_template).await?;
                pki::check_names(&template, common_name, alt_names)?;
                let ca = self
                    .referenced("certificate_authority", &template.certificate_authority)
                    .await?;
                let ca_config = ca_of(&ca).ok_or_else(|| {
                    AppError::validation(format!(
                        "certificate_authority '{}' is not a private CA configuration",
                        ca.name
                    ))
                })?;
                let ca_key = self.ca_key(&ca)?;
                let chain = self.chain(&ca).await?;

                let reuse_key = match previous {
                    Some(SecretPayload::PrivateCert { private_key, .. }) if !rotate_keys => {
                        Some(private_key.as_str())
                    }
                    _ => None,
                };
                let request = pki::LeafRequest {
                    common_name,
                    alt_names,
                    ttl: pki::effective_ttl(&template, Some(*ttl)),
                    reuse_key,
                };
                let issued = pki::issue_leaf(&ca.name, ca_config, &ca_key, chain, &request, now)?;

                Ok(Generated {
                    kind: SecretKind::PrivateCert {
                        certificate_template: certificate_template.clone(),
                        common_name: common_name.clone(),
                        alt_names: alt_names.clone(),
                        ttl: *ttl,
                        serial_number: Some(issued.serial_number),
                        issuer: Some(issued.issuer),
                        not_after: Some(issued.not_after),
                    },
                    payload: SecretPayload::PrivateCert {
                        certificate: issued.certificate,
                        private_key: issued.private_key,
                        issuing_ca: issued.issuing_ca,
                        ca_chain: issued.ca_chain,
                    },
                })
            }
            other => Err(AppError::validation(format!(
                "{} secrets need caller-supplied material for new versions",
                other.secret_type()
            ))),
        }
    }
}

fn ca_of(config: &Configuration) -> Option<&CaConfig> {
    match &config.spec {
        ConfigurationSpec::PrivateCertConfigurationRootCa(ca)
        | ConfigurationSpec::PrivateCertConfigurationIntermediateCa(ca) => Some(ca),
        _ => None,
    }
}
