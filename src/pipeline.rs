use std::path::Path;

use serde::Serialize;

use crate::bundle::ExtractedBundle;
use crate::certificate;
use crate::deploy;
use crate::error::DeployError;
use crate::nginx::LOG_DIR;
use crate::ssh::{RemoteShell, SshSession};
use crate::step::StepResult;
use crate::target::{DeployTarget, ServerProfile, Timeouts};
use crate::vhost;

/// Aggregated result of one deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    pub ok: bool,
    pub message: String,
    pub url: String,
    pub base_path: String,
    pub warnings: Vec<String>,
    pub upload: StepResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl: Option<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vhost: Option<StepResult>,
}

impl DeployOutcome {
    /// A deploy that stopped before any remote stage ran.
    #[must_use]
    pub fn aborted(target: &DeployTarget, error: &DeployError) -> Self {
        let upload = StepResult::failed(error, Vec::new());
        Self {
            ok: false,
            message: upload.message.clone(),
            url: site_url(target.public_host(), false),
            base_path: target.base_path.clone(),
            warnings: Vec::new(),
            upload,
            ssl: None,
            vhost: None,
        }
    }
}

/// `https://` only when the certificate was requested and obtained.
///
/// ```
/// use pagelift::pipeline::site_url;
///
/// assert_eq!(site_url("shop.example.com", true), "https://shop.example.com");
/// assert_eq!(site_url("203.0.113.7", false), "http://203.0.113.7");
/// ```
#[must_use]
pub fn site_url(host: &str, secure: bool) -> String {
    format!("{}://{host}", if secure { "https" } else { "http" })
}

/// Connect to the target, run every stage and disconnect.
///
/// Input and bundle problems are reported without opening a connection.
#[must_use]
pub fn deploy_site(target: &DeployTarget, bundle: &Path, timeouts: &Timeouts) -> DeployOutcome {
    if let Err(e) = target
        .validate()
        .and_then(|()| ExtractedBundle::check_archive(bundle))
    {
        tracing::warn!(host = %target.host, error = %e, "deploy rejected");
        return DeployOutcome::aborted(target, &e);
    }

    let mut session = match SshSession::open(target, timeouts.connect) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(host = %target.host, error = %e, "cannot connect");
            return DeployOutcome::aborted(target, &e);
        }
    };

    let outcome = run_stages(&session, target, bundle, timeouts);
    session.close();
    outcome
}

/// Deploy a site onto a stored server under `<deploy_path>/<site_name>`.
#[must_use]
pub fn deploy_to_profile(
    profile: &ServerProfile,
    site_name: &str,
    bundle: &Path,
    timeouts: &Timeouts,
) -> DeployOutcome {
    match profile.target_for(site_name) {
        Ok(target) => {
            tracing::info!(server = %profile.name, site = %site_name, "deploying to stored server");
            deploy_site(&target, bundle, timeouts)
        }
        Err(e) => {
            let base_path = format!("{}/{site_name}", profile.deploy_path.trim_end_matches('/'));
            let upload = StepResult::failed(&e, Vec::new());
            DeployOutcome {
                ok: false,
                message: upload.message.clone(),
                url: site_url(profile.domain.as_deref().unwrap_or(&profile.host), false),
                base_path,
                warnings: Vec::new(),
                upload,
                ssl: None,
                vhost: None,
            }
        }
    }
}

/// Upload, then optionally certificate and virtual host, over an open
/// shell.
///
/// Only a failed upload makes the outcome fail. Certificate and virtual
/// host failures end up in `warnings` and in their own step results.
#[must_use]
pub fn run_stages(
    shell: &dyn RemoteShell,
    target: &DeployTarget,
    bundle: &Path,
    timeouts: &Timeouts,
) -> DeployOutcome {
    let base_path = target.base_path.as_str();
    tracing::info!(host = %target.host, path = %base_path, "deploy started");

    let upload = deploy::deploy_bundle(shell, bundle, base_path, &target.username, timeouts.files);
    if !upload.ok {
        return DeployOutcome {
            ok: false,
            message: upload.message.clone(),
            url: site_url(target.public_host(), false),
            base_path: base_path.to_string(),
            warnings: upload.warnings.clone(),
            upload,
            ssl: None,
            vhost: None,
        };
    }

    let mut warnings = upload.warnings.clone();
    let mut message = upload.message.clone();

    let ssl = match (target.use_ssl, &target.domain, &target.email) {
        (true, Some(domain), Some(email)) => {
            Some(certificate::obtain_certificate(shell, domain, email, timeouts))
        }
        (true, _, _) => {
            warnings.push("SSL requested without both a domain and an email, skipped".into());
            None
        }
        _ => None,
    };
    let secure = ssl.as_ref().is_some_and(|step| step.ok);

    if let Some(step) = &ssl {
        warnings.extend(step.warnings.iter().cloned());
        if step.ok {
            message.push_str(&format!("\n\n{}", step.message));
        } else {
            message.push_str(&format!("\n\nSSL certificate not obtained: {}", step.message));
            warnings.push(format!("SSL certificate not obtained: {}", step.message));
        }
    }

    let url = site_url(target.public_host(), secure);

    let vhost = target.generate_vhost.then(|| {
        vhost::publish_vhost(
            shell,
            target.public_host(),
            base_path,
            &target.username,
            secure,
            target.vhost_name.as_deref(),
            timeouts.vhost,
        )
    });

    report_vhost(vhost.as_ref(), base_path, &url, &mut message, &mut warnings);

    tracing::info!(
        host = %target.host,
        %url,
        warnings = warnings.len(),
        "deploy finished"
    );

    DeployOutcome {
        ok: true,
        message,
        url,
        base_path: base_path.to_string(),
        warnings,
        upload,
        ssl,
        vhost,
    }
}

/// Fold the virtual host stage into the deploy message and warnings.
fn report_vhost(
    vhost: Option<&StepResult>,
    base_path: &str,
    url: &str,
    message: &mut String,
    warnings: &mut Vec<String>,
) {
    match vhost {
        None => message.push_str(&format!(
            "\n\nNginx was not configured. Files are in {base_path}, but the site \
             is not served until a web server points at that directory."
        )),
        Some(step) if step.ok => {
            warnings.extend(step.warnings.iter().cloned());
            message.push_str(&format!(
                "\n\nNginx configured and reloaded. The site should be available at {url}\n\n\
                 If it does not open, check:\n\
                 1. Port 80 (or 443 for HTTPS) is open in the firewall\n\
                 2. The domain or IP in the Nginx config is correct\n\
                 3. Nginx logs: sudo tail -f {LOG_DIR}/error.log"
            ));
        }
        Some(step) => {
            warnings.extend(step.warnings.iter().cloned());
            warnings.push(format!("Nginx config not applied: {}", step.message));
            message.push_str(&format!(
                "\n\nNginx config created but not applied: {}\n\n\
                 Check:\n\
                 1. Nginx is running: sudo systemctl status nginx\n\
                 2. The config is valid: sudo nginx -t\n\
                 3. Reload Nginx: sudo systemctl reload nginx\n\
                 4. Nginx logs: sudo tail -f {LOG_DIR}/error.log",
                step.message
            ));
        }
    }
}
