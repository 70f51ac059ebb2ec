//! Pre-flight checks for everything that ends up inside a remote
//! command line. All of these run before a connection is opened.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DeployError, DeployResult};

static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").expect("valid regex"));

static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$")
        .expect("valid regex")
});

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

static SITE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("valid regex"));

static DEPLOY_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/[A-Za-z0-9._-]+)+/?$").expect("valid regex"));

static SHELL_SAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_./:@%+=,-]+$").expect("valid regex"));

const SLUG_TITLE_LEN: usize = 30;
const SLUG_MAX_LEN: usize = 50;

/// System locations a site must never be deployed into.
pub const FORBIDDEN_PREFIXES: &[&str] = &[
    "/etc",
    "/root",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/var/log",
];

/// Names reserved by the builder's own infrastructure.
pub const RESERVED_SITE_NAMES: &[&str] = &[
    "www",
    "api",
    "admin",
    "static",
    "media",
    "deploy",
    "app",
    "mail",
    "ftp",
    "localhost",
];

#[must_use]
pub fn is_ipv4(host: &str) -> bool {
    IPV4.is_match(host)
}

/// Accept a dotted-quad IPv4 address or a DNS domain name.
pub fn validate_host(host: &str) -> DeployResult<()> {
    if is_ipv4(host) || DOMAIN.is_match(host) {
        Ok(())
    } else {
        Err(DeployError::InvalidInput(format!(
            "'{host}' is not a valid host. Use an IP address or a domain name"
        )))
    }
}

/// Reject relative paths, parent traversal and system directories.
///
/// The path also ends up unquoted in the Nginx `root` directive, so
/// only plain path characters and single `/` separators are allowed.
///
/// ```
/// use pagelift::validate::validate_deploy_path;
///
/// assert!(validate_deploy_path("/srv/etcetera").is_ok());
/// assert!(validate_deploy_path("/var//log/site").is_err());
/// ```
pub fn validate_deploy_path(path: &str) -> DeployResult<()> {
    if !path.starts_with('/') {
        return Err(DeployError::InvalidInput(format!(
            "deploy path must be absolute (start with /): {path}"
        )));
    }

    if path.contains("..") || path.split('/').any(|part| part == ".") {
        return Err(DeployError::InvalidInput(format!(
            "forbidden deploy path: {path}"
        )));
    }

    if !DEPLOY_PATH.is_match(path) {
        return Err(DeployError::InvalidInput(format!(
            "deploy path may only contain letters, digits, '.', '_' and '-' \
             separated by single slashes: {path}"
        )));
    }

    let base = Path::new(path);
    if let Some(prefix) = FORBIDDEN_PREFIXES
        .iter()
        .find(|prefix| base.starts_with(**prefix))
    {
        return Err(DeployError::InvalidInput(format!(
            "forbidden deploy path: {path} (inside {prefix})"
        )));
    }

    Ok(())
}

/// File name of a server block under `sites-available`.
pub fn validate_config_name(name: &str) -> DeployResult<()> {
    if name.is_empty()
        || name.contains("..")
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(DeployError::InvalidInput(format!(
            "invalid virtual host file name: {name}"
        )));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> DeployResult<()> {
    if username.is_empty() {
        return Err(DeployError::InvalidInput(
            "SSH username must not be empty".into(),
        ));
    }

    if !USERNAME.is_match(username) {
        return Err(DeployError::InvalidInput(format!(
            "SSH username '{username}' may only contain letters, digits, \
             hyphens and underscores"
        )));
    }

    Ok(())
}

pub fn validate_port(port: u16) -> DeployResult<()> {
    if port == 0 {
        return Err(DeployError::InvalidInput(
            "SSH port must be between 1 and 65535".into(),
        ));
    }
    Ok(())
}

/// Minimal shape check for the certificate contact address.
pub fn validate_email(email: &str) -> DeployResult<()> {
    let invalid = || DeployError::InvalidInput(format!("'{email}' is not a valid email address"));

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || local.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"')
        || validate_host(domain).is_err()
    {
        return Err(invalid());
    }
    Ok(())
}

/// Directory name of a site on the builder-operated server.
pub fn validate_site_name(name: &str) -> DeployResult<()> {
    if name.len() < 3 {
        return Err(DeployError::InvalidInput(
            "site name must be at least 3 characters".into(),
        ));
    }
    if name.len() > 63 {
        return Err(DeployError::InvalidInput(
            "site name must be at most 63 characters".into(),
        ));
    }
    if !SITE_NAME.is_match(name) {
        return Err(DeployError::InvalidInput(format!(
            "site name '{name}' may only contain lowercase letters, digits \
             and hyphens, and cannot start or end with a hyphen"
        )));
    }
    if RESERVED_SITE_NAMES.contains(&name) {
        return Err(DeployError::InvalidInput(format!(
            "site name '{name}' is reserved"
        )));
    }
    Ok(())
}

/// Derive a site directory name from a project title and its owner.
///
/// ```
/// use pagelift::validate::site_slug;
///
/// assert_eq!(site_slug(7, 42, "My Landing--Page"), "mylanding-page-42");
/// assert_eq!(site_slug(7, 42, "Проект"), "project7-42");
/// ```
#[must_use]
pub fn site_slug(project_id: u64, user_id: u64, title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .take(SLUG_TITLE_LEN)
        .collect();

    let mut collapsed = String::with_capacity(cleaned.len());
    for c in cleaned.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    let base = collapsed.trim_matches('-');

    let mut slug = if base.is_empty() {
        format!("project{project_id}-{user_id}")
    } else {
        format!("{base}-{user_id}")
    };
    slug.truncate(SLUG_MAX_LEN);
    slug.trim_end_matches('-').to_string()
}

/// Quote an argument for a POSIX shell. Plain paths are returned
/// unchanged.
#[must_use]
pub fn shell_quote(arg: &str) -> String {
    if SHELL_SAFE.is_match(arg) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
