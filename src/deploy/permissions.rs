//! Ownership and mode repair for a deployed site tree.

use std::time::Duration;

use crate::cmd::{self, Escalation};
use crate::error::{DeployError, DeployResult};
use crate::ssh::RemoteShell;
use crate::step::Warnings;
use crate::validate::shell_quote;

pub const DIR_MODE: &str = "755";
pub const FILE_MODE: &str = "644";

/// What was placed under the base path.
#[derive(Debug, Clone, Default)]
pub struct SiteLayout {
    pub base_path: String,
    pub stylesheet: bool,
    pub asset_dir: bool,
    pub assets: Vec<String>,
}

impl SiteLayout {
    #[must_use]
    pub fn new(base_path: &str) -> Self {
        Self {
            base_path: base_path.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn entry_page(&self) -> String {
        format!("{}/{}", self.base_path, crate::bundle::ENTRY_PAGE)
    }

    #[must_use]
    pub fn stylesheet_path(&self) -> String {
        format!("{}/{}", self.base_path, crate::bundle::STYLESHEET)
    }

    #[must_use]
    pub fn asset_dir_path(&self) -> String {
        format!("{}/{}", self.base_path, crate::bundle::ASSET_DIR)
    }

    /// Uploaded files that must end up world readable.
    #[must_use]
    pub fn files(&self) -> Vec<String> {
        let mut files = vec![self.entry_page()];
        if self.stylesheet {
            files.push(self.stylesheet_path());
        }
        let dir = self.asset_dir_path();
        files.extend(self.assets.iter().map(|name| format!("{dir}/{name}")));
        files
    }
}

/// Every ancestor of `path` below `/`, outermost first, excluding
/// `path` itself.
///
/// ```
/// use pagelift::deploy::permissions::ancestors;
///
/// assert_eq!(ancestors("/var/www/site"), vec!["/var", "/var/www"]);
/// assert!(ancestors("/site").is_empty());
/// ```
#[must_use]
pub fn ancestors(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    (1..parts.len())
        .map(|i| format!("/{}", parts[..i].join("/")))
        .collect()
}

/// `chown -R user:user` on the base path. Failure is only a warning.
pub fn assert_ownership(
    shell: &dyn RemoteShell,
    base_path: &str,
    username: &str,
    timeout: Duration,
    warnings: &mut Warnings,
) -> DeployResult<()> {
    let command = format!("chown -R {username}:{username} {}", shell_quote(base_path));
    match cmd::run_with_fallback(shell, &command, Escalation::ElevatedFirst, timeout) {
        Ok(_) => Ok(()),
        Err(DeployError::RemoteCommand { stderr, .. }) => {
            warnings.push(format!(
                "could not set owner of {base_path} to {username}: {stderr}"
            ));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Set one mode with elevation fallback.
pub fn chmod(
    shell: &dyn RemoteShell,
    mode: &str,
    path: &str,
    timeout: Duration,
) -> DeployResult<()> {
    let command = format!("chmod {mode} {}", shell_quote(path));
    cmd::run_with_fallback(shell, &command, Escalation::ElevatedFirst, timeout).map(|_| ())
}

/// Like [`chmod`], but a failed command becomes a warning.
pub fn chmod_soft(
    shell: &dyn RemoteShell,
    mode: &str,
    path: &str,
    timeout: Duration,
    warnings: &mut Warnings,
) -> DeployResult<()> {
    match chmod(shell, mode, path, timeout) {
        Ok(()) => Ok(()),
        Err(DeployError::RemoteCommand { stderr, .. }) => {
            warnings.push(format!("could not set mode {mode} on {path}: {stderr}"));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Ownership plus modes for the whole chain from `/` down to every
/// uploaded file.
///
/// Ancestor directories and the base path only warn on failure since
/// they may already be traversable. The asset directory and uploaded
/// files must succeed.
pub fn repair(
    shell: &dyn RemoteShell,
    layout: &SiteLayout,
    username: &str,
    timeout: Duration,
    warnings: &mut Warnings,
) -> DeployResult<()> {
    assert_ownership(shell, &layout.base_path, username, timeout, warnings)?;

    for dir in ancestors(&layout.base_path) {
        chmod_soft(shell, DIR_MODE, &dir, timeout, warnings)?;
    }
    chmod_soft(shell, DIR_MODE, &layout.base_path, timeout, warnings)?;

    if layout.asset_dir {
        chmod(shell, DIR_MODE, &layout.asset_dir_path(), timeout)?;
    }
    for file in layout.files() {
        chmod(shell, FILE_MODE, &file, timeout)?;
    }

    tracing::info!(path = %layout.base_path, "permissions repaired");
    Ok(())
}

/// Octal permission bits of a remote path, e.g. `0o644`.
pub fn remote_mode(
    shell: &dyn RemoteShell,
    path: &str,
    timeout: Duration,
) -> DeployResult<Option<u32>> {
    let output = shell.execute(&format!("stat -c %a {}", shell_quote(path)), timeout)?;
    if !output.success() {
        return Ok(None);
    }
    Ok(u32::from_str_radix(output.stdout.trim(), 8).ok())
}

#[must_use]
pub const fn world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
