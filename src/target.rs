use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DeployError, DeployResult};
use crate::validate;

/// Environment variable consulted when a server profile carries no
/// password.
pub const PASSWORD_ENV: &str = "PAGELIFT_SSH_PASSWORD";

/// Where and how a site is published.
///
/// # Example
///
/// ```
/// use pagelift::DeployTarget;
///
/// let target = DeployTarget::new("203.0.113.7", "deploy", "s3cret", "/var/www/shop")
///     .port(2222)
///     .domain("shop.example.com")
///     .email("owner@example.com")
///     .ssl()
///     .vhost();
///
/// assert_eq!(target.port, 2222);
/// assert!(target.use_ssl);
/// assert!(target.generate_vhost);
/// assert_eq!(target.public_host(), "shop.example.com");
/// ```
#[derive(Debug, Clone)]
pub struct DeployTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub base_path: String,
    pub domain: Option<String>,
    pub email: Option<String>,
    pub use_ssl: bool,
    pub generate_vhost: bool,
    pub vhost_name: Option<String>,
}

impl DeployTarget {
    #[must_use]
    pub fn new(host: &str, username: &str, password: &str, base_path: &str) -> Self {
        Self {
            host: host.to_string(),
            port: 22,
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
            base_path: base_path.trim_end_matches('/').to_string(),
            domain: None,
            email: None,
            use_ssl: false,
            generate_vhost: false,
            vhost_name: None,
        }
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    #[must_use]
    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    #[must_use]
    pub const fn ssl(mut self) -> Self {
        self.use_ssl = true;
        self
    }

    #[must_use]
    pub const fn vhost(mut self) -> Self {
        self.generate_vhost = true;
        self
    }

    #[must_use]
    pub fn vhost_name(mut self, name: &str) -> Self {
        self.vhost_name = Some(name.to_string());
        self
    }

    /// The name visitors use: the domain if set, the SSH host otherwise.
    #[must_use]
    pub fn public_host(&self) -> &str {
        self.domain.as_deref().unwrap_or(&self.host)
    }

    /// Check every field that will reach a remote command line.
    pub fn validate(&self) -> DeployResult<()> {
        validate::validate_host(&self.host)?;
        validate::validate_port(self.port)?;
        validate::validate_username(&self.username)?;
        validate::validate_deploy_path(&self.base_path)?;
        if let Some(domain) = &self.domain {
            validate::validate_host(domain)?;
        }
        if let Some(email) = &self.email {
            validate::validate_email(email)?;
        }
        if let Some(name) = &self.vhost_name {
            validate::validate_config_name(name)?;
        }
        Ok(())
    }
}

/// A builder-operated VPS, as stored by the web layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing, deserialize_with = "secret")]
    pub password: Option<SecretString>,
    pub deploy_path: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_true")]
    pub nginx_config_enabled: bool,
    #[serde(default)]
    pub ssl_enabled: bool,
}

fn secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

const fn default_port() -> u16 {
    22
}

const fn default_true() -> bool {
    true
}

impl ServerProfile {
    /// Read a profile from a JSON file.
    pub fn load(path: &Path) -> DeployResult<Self> {
        if !path.exists() {
            return Err(DeployError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Resolve the SSH password: the profile's own, or
    /// [`PASSWORD_ENV`].
    pub fn password(&self) -> DeployResult<String> {
        if let Some(password) = self
            .password
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .filter(|p| !p.is_empty())
        {
            return Ok(password.to_string());
        }
        std::env::var(PASSWORD_ENV).map_err(|_| DeployError::EnvMissing(PASSWORD_ENV.into()))
    }

    /// Build the target for one site under this server's deploy root.
    ///
    /// SSL is requested only when the profile enables it and has both a
    /// domain and a contact email.
    pub fn target_for(&self, site_name: &str) -> DeployResult<DeployTarget> {
        validate::validate_site_name(site_name)?;

        let base = format!("{}/{site_name}", self.deploy_path.trim_end_matches('/'));
        let mut target = DeployTarget::new(&self.host, &self.username, &self.password()?, &base)
            .port(self.port);

        if let Some(domain) = &self.domain {
            target = target.domain(domain);
        }
        if let Some(email) = &self.email {
            target = target.email(email);
        }
        if self.ssl_enabled && self.domain.is_some() && self.email.is_some() {
            target = target.ssl();
        }
        if self.nginx_config_enabled {
            target = target.vhost();
        }
        Ok(target)
    }
}

/// Per-command timeouts for each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub files: Duration,
    pub probe: Duration,
    pub install: Duration,
    pub certificate: Duration,
    pub vhost: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            files: Duration::from_secs(30),
            probe: Duration::from_secs(10),
            install: Duration::from_secs(60),
            certificate: Duration::from_secs(120),
            vhost: Duration::from_secs(30),
        }
    }
}
