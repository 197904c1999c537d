use std::collections::HashMap;
use std::path::{Path, PathBuf};
use crate::config::CredentialsConfig;
use crate::error::{AdminError, Result};
use crate::ssh::{shell_quote, SshTarget};

const EUCARC: &str = "eucarc";

const ACCESS_KEY_VARS: [&str; 3] = ["EC2_ACCESS_KEY", "AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY"];
const SECRET_KEY_VARS: [&str; 3] = ["EC2_SECRET_KEY", "AWS_SECRET_ACCESS_KEY", "AWS_SECRET_KEY"];

/// Resolved access keys for the admin account
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub account: String,
    pub user: String,
    /// Where the keys came from, for logging
    pub source: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("source", &self.source)
            .finish()
    }
}

impl Credentials {
    /// Variables the admin tools read for keys and service endpoint
    pub fn env(&self, endpoint: &str) -> Vec<(&'static str, String)> {
        vec![
            ("EC2_ACCESS_KEY", self.access_key.clone()),
            ("EC2_SECRET_KEY", self.secret_key.clone()),
            ("AWS_ACCESS_KEY_ID", self.access_key.clone()),
            ("AWS_SECRET_ACCESS_KEY", self.secret_key.clone()),
            ("EC2_URL", endpoint.to_string()),
            ("EUCA_BOOTSTRAP_URL", endpoint.to_string()),
        ]
    }
}

/// Resolve credentials: explicit config, then environment, then a local
/// eucarc, then the eucarc on the controller.
pub async fn resolve(config: &CredentialsConfig, controller: &SshTarget) -> Result<Credentials> {
    if let Some(creds) = resolve_local(config, |name| std::env::var(name).ok())? {
        tracing::info!("Using credentials from {}", creds.source);
        return Ok(creds);
    }

    if let Some(remote_path) = &config.remote_eucarc {
        let contents = controller
            .run(&format!("cat {}", shell_quote(remote_path)))
            .await
            .map_err(|e| AdminError::Credentials(format!(
                "failed to read {} on {}: {}",
                remote_path,
                controller.host(),
                e
            )))?;
        let source = format!("{}:{}", controller.host(), remote_path);
        let creds = from_eucarc(&contents, config, &source)?;
        tracing::info!("Using credentials from {}", creds.source);
        return Ok(creds);
    }

    Err(AdminError::Credentials(
        "no access keys in config, environment or credpath, and no remote_eucarc configured"
            .to_string(),
    ))
}

/// Every source that does not need the network. `Ok(None)` means keep looking.
pub fn resolve_local<F>(config: &CredentialsConfig, env: F) -> Result<Option<Credentials>>
where
    F: Fn(&str) -> Option<String>,
{
    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        return Ok(Some(build(access_key.clone(), secret_key.clone(), config, "config")));
    }
    if config.access_key.is_some() != config.secret_key.is_some() {
        return Err(AdminError::Configuration(
            "credentials.access_key and credentials.secret_key must be set together".to_string(),
        ));
    }

    for (access_var, secret_var) in ACCESS_KEY_VARS.into_iter().zip(SECRET_KEY_VARS) {
        if let (Some(access_key), Some(secret_key)) = (env(access_var), env(secret_var)) {
            let source = format!("environment ({})", access_var);
            return Ok(Some(build(access_key, secret_key, config, &source)));
        }
    }

    if let Some(credpath) = &config.credpath {
        let path = eucarc_path(credpath);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            AdminError::Credentials(format!("failed to read {}: {}", path.display(), e))
        })?;
        let source = path.display().to_string();
        return from_eucarc(&contents, config, &source).map(Some);
    }

    Ok(None)
}

fn eucarc_path(credpath: &Path) -> PathBuf {
    if credpath.is_dir() {
        credpath.join(EUCARC)
    } else {
        credpath.to_path_buf()
    }
}

fn build(access_key: String, secret_key: String, config: &CredentialsConfig, source: &str) -> Credentials {
    Credentials {
        access_key,
        secret_key,
        account: config.account.clone(),
        user: config.user.clone(),
        source: source.to_string(),
    }
}

fn from_eucarc(contents: &str, config: &CredentialsConfig, source: &str) -> Result<Credentials> {
    let vars = parse_eucarc(contents);
    let lookup = |names: &[&str]| names.iter().find_map(|n| vars.get(*n).cloned());

    match (lookup(&ACCESS_KEY_VARS[..]), lookup(&SECRET_KEY_VARS[..])) {
        (Some(access_key), Some(secret_key)) => Ok(build(access_key, secret_key, config, source)),
        _ => Err(AdminError::Credentials(format!("no access/secret key pair in {}", source))),
    }
}

/// Parse `export NAME=value` / `NAME=value` assignments, stripping quotes.
/// Lines that are not simple assignments are ignored.
pub fn parse_eucarc(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line).trim();
            let (name, value) = line.split_once('=')?;
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                .unwrap_or(value);
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}
