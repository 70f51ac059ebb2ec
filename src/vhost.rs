//! Publishing a rendered server block to Nginx and checking the site
//! actually serves.

use std::time::Duration;

use crate::bundle::{ASSET_DIR, STYLESHEET};
use crate::cmd::{self, Escalation};
use crate::error::{DeployError, DeployResult};
use crate::nginx::{self, LOG_DIR, SITES_AVAILABLE, SITES_ENABLED, VHostConfig};
use crate::ssh::RemoteShell;
use crate::step::{StepResult, Warnings};
use crate::validate::{self, shell_quote};

const ERROR_LOG_LINES: u32 = 20;

/// Render, install and activate the server block for a site, then run
/// the verification battery.
#[must_use]
pub fn publish_vhost(
    shell: &dyn RemoteShell,
    domain: &str,
    base_path: &str,
    username: &str,
    use_ssl: bool,
    config_name: Option<&str>,
    timeout: Duration,
) -> StepResult {
    let mut warnings = Warnings::new();
    let result = publish(
        shell,
        domain,
        base_path,
        username,
        use_ssl,
        config_name,
        timeout,
        &mut warnings,
    );
    if let Err(e) = &result {
        tracing::error!(%domain, error = %e, "virtual host not published");
    }
    StepResult::from_result(result, warnings.into_inner())
}

#[allow(clippy::too_many_arguments)]
fn publish(
    shell: &dyn RemoteShell,
    domain: &str,
    base_path: &str,
    username: &str,
    use_ssl: bool,
    config_name: Option<&str>,
    timeout: Duration,
    warnings: &mut Warnings,
) -> DeployResult<String> {
    validate::validate_host(domain)?;
    validate::validate_deploy_path(base_path)?;
    validate::validate_username(username)?;
    if let Some(name) = config_name {
        validate::validate_config_name(name)?;
    }

    let file_name = nginx::config_file_name(domain, config_name);
    let config = VHostConfig::for_site(domain, base_path, use_ssl, config_name);
    let available = format!("{SITES_AVAILABLE}/{file_name}");
    let enabled = format!("{SITES_ENABLED}/{file_name}");

    tracing::info!(%domain, config = %available, ssl = use_ssl, "publishing virtual host");

    install_config(shell, &config.render(), &file_name, &available, timeout)?;
    cmd::run_with_fallback(
        shell,
        &format!("ln -sf {} {}", shell_quote(&available), shell_quote(&enabled)),
        Escalation::PlainFirst,
        timeout,
    )?;

    ensure_running(shell, timeout)?;

    cmd::run_with_fallback(shell, "nginx -t", Escalation::PlainFirst, timeout)
        .map_err(|e| match e {
            DeployError::RemoteCommand { stderr, .. } => DeployError::ConfigSyntax(stderr),
            other => other,
        })?;

    reload(shell, timeout)?;

    let site = Site {
        base_path,
        username,
        enabled: &enabled,
    };
    site.verify(shell, timeout, warnings)?;

    tracing::info!(%domain, "virtual host active");
    Ok(format!(
        "Nginx configured for {domain} ({})",
        if use_ssl { "https" } else { "http" }
    ))
}

/// Write straight into sites-available, or stage under `/tmp` and
/// move it into place with elevation.
fn install_config(
    shell: &dyn RemoteShell,
    content: &str,
    file_name: &str,
    available: &str,
    timeout: Duration,
) -> DeployResult<()> {
    match shell.write_file(content.as_bytes(), available) {
        Ok(()) => return Ok(()),
        Err(e @ (DeployError::Connection(_) | DeployError::Timeout { .. })) => return Err(e),
        Err(e) => tracing::debug!(error = %e, "direct write refused, staging in /tmp"),
    }

    let staged = format!("/tmp/{file_name}");
    shell.write_file(content.as_bytes(), &staged)?;
    cmd::run_with_fallback(
        shell,
        &format!("mv {} {}", shell_quote(&staged), shell_quote(available)),
        Escalation::ElevatedFirst,
        timeout,
    )?;
    Ok(())
}

fn ensure_running(shell: &dyn RemoteShell, timeout: Duration) -> DeployResult<()> {
    let status = shell.execute("systemctl is-active nginx", timeout)?;
    if status.stdout.trim() == "active" {
        return Ok(());
    }

    tracing::info!(status = %status.stdout.trim(), "nginx not running, starting it");
    let started = cmd::sudo(shell, "systemctl start nginx", timeout)?;
    if started.success() {
        Ok(())
    } else {
        Err(DeployError::ServiceReload(format!(
            "nginx is not running and could not be started: {}. \
             Run `sudo systemctl start nginx` on the server",
            started.diagnostics()
        )))
    }
}

/// Reload, falling back to a full restart.
fn reload(shell: &dyn RemoteShell, timeout: Duration) -> DeployResult<()> {
    let attempt =
        |command: &str| cmd::run_with_fallback(shell, command, Escalation::PlainFirst, timeout);

    let reload_err = match attempt("systemctl reload nginx") {
        Ok(_) => return Ok(()),
        Err(DeployError::RemoteCommand { stderr, .. }) => stderr,
        Err(e) => return Err(e),
    };
    tracing::warn!(stderr = %reload_err, "reload failed, restarting nginx");

    match attempt("systemctl restart nginx") {
        Ok(_) => Ok(()),
        Err(DeployError::RemoteCommand { stderr, .. }) => Err(DeployError::ServiceReload(format!(
            "reload: {reload_err}; restart: {stderr}. \
             Run `sudo systemctl restart nginx` on the server"
        ))),
        Err(e) => Err(e),
    }
}

struct Site<'a> {
    base_path: &'a str,
    username: &'a str,
    enabled: &'a str,
}

impl Site<'_> {
    fn entry_page(&self) -> String {
        format!("{}/{}", self.base_path, crate::bundle::ENTRY_PAGE)
    }

    fn verify(
        &self,
        shell: &dyn RemoteShell,
        timeout: Duration,
        warnings: &mut Warnings,
    ) -> DeployResult<()> {
        let base = shell_quote(self.base_path);
        let entry = self.entry_page();
        let entry_q = shell_quote(&entry);
        let user = self.username;

        if !cmd::probe(shell, &format!("test -L {}", shell_quote(self.enabled)), timeout)? {
            warnings.push(format!("{} is not a symlink", self.enabled));
        }
        if !cmd::probe(shell, &format!("test -f {entry_q}"), timeout)? {
            warnings.push(format!("{entry} does not exist"));
        }

        self.soft(shell, &format!("chown -R {user}:{user} {base}"), timeout, warnings)?;
        self.soft(shell, &format!("chmod 755 {base}"), timeout, warnings)?;
        self.soft(shell, &format!("chmod 644 {entry_q}"), timeout, warnings)?;

        let stylesheet = format!("{}/{STYLESHEET}", self.base_path);
        if cmd::probe(shell, &format!("test -f {}", shell_quote(&stylesheet)), timeout)? {
            self.soft(
                shell,
                &format!("chmod 644 {}", shell_quote(&stylesheet)),
                timeout,
                warnings,
            )?;
        }
        let assets = format!("{}/{ASSET_DIR}", self.base_path);
        let assets_q = shell_quote(&assets);
        if cmd::probe(shell, &format!("test -d {assets_q}"), timeout)? {
            self.soft(shell, &format!("chmod 755 {assets_q}"), timeout, warnings)?;
            self.soft(
                shell,
                &format!("find {assets_q} -type f -exec chmod 644 {{}} +"),
                timeout,
                warnings,
            )?;
        }

        let readable = cmd::sudo(shell, &format!("-u {user} test -r {entry_q}"), timeout)?;
        if !readable.success() {
            return Err(DeployError::Verification(format!(
                "{entry} is not readable by {user} after fixing permissions. \
                 Check manually: sudo -u {user} test -r {entry}"
            )));
        }
        let traversable = cmd::sudo(shell, &format!("-u {user} test -x {base}"), timeout)?;
        if !traversable.success() {
            return Err(DeployError::Verification(format!(
                "{} is not accessible to {user}. \
                 Check manually: sudo -u {user} test -x {}",
                self.base_path, self.base_path
            )));
        }

        let css = shell.execute(
            &format!("curl -I http://localhost/{STYLESHEET} 2>&1 | head -n 5"),
            timeout,
        )?;
        if css.stdout.contains("404") {
            warnings.push(format!("{STYLESHEET} is not served (404)"));
        }

        let log = cmd::sudo(
            shell,
            &format!("tail -n {ERROR_LOG_LINES} {LOG_DIR}/error.log"),
            timeout,
        )?;
        let recent = log.stdout.trim();
        if ["502", "Bad Gateway", "Permission denied"]
            .iter()
            .any(|needle| recent.contains(needle))
        {
            return Err(DeployError::Verification(format!(
                "nginx reports errors:\n{recent}\n\n{}",
                self.remediation()
            )));
        }

        let root = shell.execute("curl -I http://localhost/ 2>&1 | head -n 5", timeout)?;
        let head = root.stdout.trim();
        if head.contains("502") || head.contains("Bad Gateway") {
            return Err(DeployError::Verification(format!(
                "502 Bad Gateway from http://localhost/:\n{head}\n\n\
                 Check the logs: sudo tail -f {LOG_DIR}/error.log"
            )));
        }

        Ok(())
    }

    /// Elevated-first command whose failure is only a warning.
    fn soft(
        &self,
        shell: &dyn RemoteShell,
        command: &str,
        timeout: Duration,
        warnings: &mut Warnings,
    ) -> DeployResult<()> {
        match cmd::run_with_fallback(shell, command, Escalation::ElevatedFirst, timeout) {
            Ok(_) => Ok(()),
            Err(DeployError::RemoteCommand { stderr, .. }) => {
                warnings.push(format!(
                    "`{command}` failed under {}: {stderr}",
                    self.base_path
                ));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn remediation(&self) -> String {
        let (base, user) = (self.base_path, self.username);
        format!(
            "Check:\n\
             1. Permissions: sudo chmod 755 {base} && sudo chmod 644 {base}/index.html\n\
             2. Owner: sudo chown -R {user}:{user} {base}\n\
             3. Logs: sudo tail -f {LOG_DIR}/error.log"
        )
    }
}
