//! Field-level checks shared by every prototype.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{AppError, Result};

static SECRET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("valid regex"));
static LOCK_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("valid regex"));
static CONFIG_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$").expect("valid regex"));
static DOMAIN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\*\.)?([A-Za-z0-9]([A-Za-z0-9\-]{0,61}[A-Za-z0-9])?\.)*[A-Za-z0-9]([A-Za-z0-9\-]{0,61}[A-Za-z0-9])?$")
        .expect("valid regex")
});

pub const MAX_LABELS: usize = 30;
pub const MAX_DESCRIPTION: usize = 1024;

fn check(field: &str, value: &str, min: usize, max: usize, pattern: Option<&Regex>) -> Result<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(AppError::validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    if let Some(re) = pattern {
        if !re.is_match(value) {
            return Err(AppError::validation(format!(
                "{field} '{value}' contains invalid characters"
            )));
        }
    }
    Ok(())
}

pub fn secret_name(name: &str) -> Result<()> {
    check("name", name, 2, 256, Some(&SECRET_NAME))
}

pub fn group_name(name: &str) -> Result<()> {
    check("name", name, 2, 64, None)?;
    if name.trim() != name {
        return Err(AppError::validation("name must not have leading or trailing spaces"));
    }
    Ok(())
}

pub fn lock_name(name: &str) -> Result<()> {
    check("lock name", name, 2, 30, Some(&LOCK_NAME))
}

pub fn configuration_name(name: &str) -> Result<()> {
    check("name", name, 2, 128, Some(&CONFIG_NAME))
}

pub fn description(value: Option<&str>) -> Result<()> {
    match value {
        Some(d) if d.chars().count() > MAX_DESCRIPTION => Err(AppError::validation(format!(
            "description must be at most {MAX_DESCRIPTION} characters"
        ))),
        _ => Ok(()),
    }
}

pub fn labels(labels: &[String]) -> Result<()> {
    if labels.len() > MAX_LABELS {
        return Err(AppError::validation(format!(
            "a secret can carry at most {MAX_LABELS} labels"
        )));
    }
    for label in labels {
        check("label", label, 2, 64, None)?;
    }
    Ok(())
}

pub fn domain_name(value: &str) -> Result<()> {
    if value.len() > 253 || !DOMAIN_NAME.is_match(value) {
        return Err(AppError::validation(format!("'{value}' is not a valid DNS name")));
    }
    Ok(())
}

pub fn http_url(value: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(value)
        .map_err(|_| AppError::validation(format!("'{value}' is not a valid URL")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::validation("endpoint_url must use http or https"));
    }
    Ok(parsed)
}
