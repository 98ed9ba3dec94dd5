use crate::token::ApiToken;
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub webserver: Webserver,
    pub argocd: ArgoCd,
    #[serde(default)]
    pub tls: Tls,
    /// Cron expression for periodic refreshes; refresh only on demand when unset.
    #[serde(default)]
    pub refresh_schedule: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webserver {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCd {
    pub server: String,
    pub token: ApiToken,
    pub application: String,
    #[serde(default = "default_app_namespace")]
    pub app_namespace: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    #[serde(default)]
    pub ca_certificate_paths: Vec<PathBuf>,
}

fn default_app_namespace() -> String {
    "argocd".to_string()
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming every missing variable.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        bail!("Missing environment variable: {}", missing.join(", "));
    }

    Ok(result.into_owned())
}
