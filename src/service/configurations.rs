use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::SecretsManager;
use crate::errors::{AppError, Result};
use crate::metrics::recorder;
use crate::models::configuration::{
    require_non_empty, Configuration, ConfigurationPrototype, ConfigurationSpec,
    LetsEncryptEnvironment,
};
use crate::models::pagination::Window;
use crate::models::patch;
use crate::models::ttl::Ttl;
use crate::models::validation;
use crate::store::ConfigurationFilter;

// Editable projections per configuration type. Write-only credentials are
// absent from the projection but accepted in the patch.

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CaPatch {
    max_ttl: Ttl,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplatePatch {
    allowed_domains: Vec<String>,
    allow_subdomains: bool,
    allow_any_name: bool,
    max_ttl: Ttl,
    ttl: Ttl,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct IamPatch {
    disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LetsEncryptPatch {
    lets_encrypt_environment: LetsEncryptEnvironment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lets_encrypt_preferred_chain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lets_encrypt_private_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CisPatch {
    cloud_internet_services_crn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cloud_internet_services_apikey: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassicPatch {
    classic_infrastructure_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    classic_infrastructure_password: Option<String>,
}

fn apply<T: Serialize + DeserializeOwned>(current: T, merge_patch: &Value) -> Result<T> {
    patch::apply(&current, merge_patch)
}

impl SecretsManager {
    pub async fn create_configuration(&self, proto: ConfigurationPrototype) -> Result<Value> {
        proto.validate()?;
        let config_type = proto.spec.config_type();
        let _registry = self.registry_lock.lock().await;
        if self.repo.get_configuration(&proto.name).await?.is_some() {
            return Err(AppError::conflict(format!(
                "configuration '{}' already exists",
                proto.name
            )));
        }
        self.engines.check_quota(config_type).await?;

        let config = self.engines.build_configuration(proto, Utc::now()).await?;
        self.repo.insert_configuration(&config).await?;
        recorder().configuration("create", config_type.as_str());
        info!(name = %config.name, config_type = %config_type, "configuration created");
        config.to_json()
    }

    pub async fn list_configurations(
        &self,
        filter: &ConfigurationFilter,
        window: Window,
    ) -> Result<(Vec<Value>, u64)> {
        let (configs, total) = self.repo.list_configurations(filter, window).await?;
        let views = configs
            .iter()
            .map(Configuration::to_json)
            .collect::<Result<Vec<_>>>()?;
        Ok((views, total))
    }

    pub async fn get_configuration(&self, name: &str) -> Result<Value> {
        self.engines.configuration(name).await?.to_json()
    }

    /// Merge-patch the mutable fields of a configuration. Which fields are
    /// mutable depends on its type; CA certificates themselves never change.
    pub async fn update_configuration(&self, name: &str, merge_patch: &Value) -> Result<Value> {
        let _registry = self.registry_lock.lock().await;
        let mut config = self.engines.configuration(name).await?;
        let original = self.engines.material(&config)?;
        let mut material = original.clone();

        match &mut config.spec {
            ConfigurationSpec::PrivateCertConfigurationRootCa(ca)
            | ConfigurationSpec::PrivateCertConfigurationIntermediateCa(ca) => {
                let patched = apply(CaPatch { max_ttl: Ttl(ca.max_ttl) }, merge_patch)?;
                if patched.max_ttl.seconds() == 0 {
                    return Err(AppError::validation("max_ttl must be positive"));
                }
                ca.max_ttl = patched.max_ttl.seconds();
            }
            ConfigurationSpec::PrivateCertConfigurationTemplate(t) => {
                let patched = apply(
                    TemplatePatch {
                        allowed_domains: t.allowed_domains.clone(),
                        allow_subdomains: t.allow_subdomains,
                        allow_any_name: t.allow_any_name,
                        max_ttl: Ttl(t.max_ttl),
                        ttl: Ttl(t.ttl),
                    },
                    merge_patch,
                )?;
                for domain in &patched.allowed_domains {
                    validation::domain_name(domain)?;
                }
                if !patched.allow_any_name && patched.allowed_domains.is_empty() {
                    return Err(AppError::validation(
                        "allowed_domains is required unless allow_any_name is true",
                    ));
                }
                let ca_max_ttl = self.engines.ca_max_ttl(&t.certificate_authority).await?;
                let max_ttl = patched.max_ttl.seconds().min(ca_max_ttl);
                if patched.ttl.seconds() > max_ttl {
                    return Err(AppError::validation(format!(
                        "ttl must not exceed max_ttl ({max_ttl}s)"
                    )));
                }
                t.allowed_domains = patched.allowed_domains;
                t.allow_subdomains = patched.allow_subdomains;
                t.allow_any_name = patched.allow_any_name;
                t.max_ttl = max_ttl;
                t.ttl = patched.ttl.seconds();
            }
            ConfigurationSpec::IamCredentialsConfiguration(iam) => {
                let patched = apply(
                    IamPatch {
                        disabled: iam.disabled,
                        api_key: None,
                    },
                    merge_patch,
                )?;
                iam.disabled = patched.disabled;
                if let Some(api_key) = patched.api_key {
                    require_non_empty("api_key", &api_key)?;
                    material.api_key = Some(api_key);
                }
            }
            ConfigurationSpec::PublicCertConfigurationCaLetsEncrypt(le) => {
                let patched = apply(
                    LetsEncryptPatch {
                        lets_encrypt_environment: le.lets_encrypt_environment,
                        lets_encrypt_preferred_chain: le.lets_encrypt_preferred_chain.clone(),
                        lets_encrypt_private_key: None,
                    },
                    merge_patch,
                )?;
                le.lets_encrypt_environment = patched.lets_encrypt_environment;
                le.lets_encrypt_preferred_chain = patched.lets_encrypt_preferred_chain;
                if let Some(key) = patched.lets_encrypt_private_key {
                    if !key.contains("PRIVATE KEY-----") {
                        return Err(AppError::validation(
                            "lets_encrypt_private_key must be a PEM encoded private key",
                        ));
                    }
                    material.private_key = Some(key);
                }
            }
            ConfigurationSpec::PublicCertConfigurationDnsCloudInternetServices(cis) => {
                let patched = apply(
                    CisPatch {
                        cloud_internet_services_crn: cis.cloud_internet_services_crn.clone(),
                        cloud_internet_services_apikey: None,
                    },
                    merge_patch,
                )?;
                if !patched.cloud_internet_services_crn.starts_with("crn:") {
                    return Err(AppError::validation("cloud_internet_services_crn must be a CRN"));
                }
                cis.cloud_internet_services_crn = patched.cloud_internet_services_crn;
                if let Some(apikey) = patched.cloud_internet_services_apikey {
                    material.api_key = Some(apikey);
                }
            }
            ConfigurationSpec::PublicCertConfigurationDnsClassicInfrastructure(classic) => {
                let patched = apply(
                    ClassicPatch {
                        classic_infrastructure_username: classic
                            .classic_infrastructure_username
                            .clone(),
                        classic_infrastructure_password: None,
                    },
                    merge_patch,
                )?;
                require_non_empty(
                    "classic_infrastructure_username",
                    &patched.classic_infrastructure_username,
                )?;
                classic.classic_infrastructure_username = patched.classic_infrastructure_username;
                if let Some(password) = patched.classic_infrastructure_password {
                    require_non_empty("classic_infrastructure_password", &password)?;
                    material.password = Some(password);
                }
            }
        }

        if material != original {
            config.sealed = self.engines.seal_material(&material)?;
        }
        config.updated_at = Utc::now();
        self.repo.update_configuration(&config).await?;
        recorder().configuration("update", config.config_type().as_str());
        info!(name = %config.name, "configuration updated");
        config.to_json()
    }

    /// Delete a configuration nobody depends on any more.
    pub async fn delete_configuration(&self, name: &str) -> Result<()> {
        let _registry = self.registry_lock.lock().await;
        let config = self.engines.configuration(name).await?;
        let dependents = self.repo.configurations_referencing(name).await?;
        if !dependents.is_empty() {
            return Err(AppError::conflict(format!(
                "configuration '{name}' is referenced by {}",
                dependents.join(", ")
            )));
        }
        let secrets = self.repo.count_secrets_using_configuration(name).await?;
        if secrets > 0 {
            return Err(AppError::conflict(format!(
                "configuration '{name}' is used by {secrets} secret(s)"
            )));
        }
        if !self.repo.delete_configuration(name).await? {
            return Err(AppError::not_found(format!("configuration '{name}'")));
        }
        recorder().configuration("delete", config.config_type().as_str());
        info!(name, "configuration deleted");
        Ok(())
    }
}

