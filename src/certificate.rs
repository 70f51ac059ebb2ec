//! Let's Encrypt certificates through certbot's standalone challenge.
//!
//! The standalone challenge binds port 80 itself, so Nginx is stopped
//! for the duration of the request and started again afterwards no
//! matter how the request ends.

use std::time::Duration;

use serde::Serialize;

use crate::cmd;
use crate::error::{CertFailure, DeployError, DeployResult};
use crate::ssh::{CommandOutput, RemoteShell};
use crate::step::{StepResult, Warnings};
use crate::target::Timeouts;
use crate::validate::{self, shell_quote};

pub const CERTBOT_PACKAGES: &str = "certbot python3-certbot-nginx";

/// Progress of one certificate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertState {
    NotStarted,
    ToolCheck,
    Installing,
    ServerStopped,
    Requesting,
    ServerRestarted,
    Done,
    Failed,
}

/// Everything a caller may want to know about a certificate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRun {
    /// States passed through, in order.
    pub states: Vec<CertState>,
    /// Whether `systemctl start nginx` succeeded. `None` if the request
    /// was never attempted.
    pub restarted: Option<bool>,
    pub result: StepResult,
}

impl CertificateRun {
    #[must_use]
    pub fn final_state(&self) -> CertState {
        self.states.last().copied().unwrap_or(CertState::NotStarted)
    }

    #[must_use]
    pub fn passed(&self, state: CertState) -> bool {
        self.states.contains(&state)
    }
}

/// The certbot invocation for one domain.
///
/// ```
/// use pagelift::certificate::certbot_command;
///
/// assert_eq!(
///     certbot_command("example.com", "ops@example.com"),
///     "certbot certonly --standalone --non-interactive --agree-tos \
///      --email ops@example.com -d example.com --preferred-challenges http"
/// );
/// ```
#[must_use]
pub fn certbot_command(domain: &str, email: &str) -> String {
    format!(
        "certbot certonly --standalone --non-interactive --agree-tos \
         --email {} -d {} --preferred-challenges http",
        shell_quote(email),
        shell_quote(domain)
    )
}

/// Obtain a certificate for `domain`. See [`request_certificate`] for
/// the state trace.
#[must_use]
pub fn obtain_certificate(
    shell: &dyn RemoteShell,
    domain: &str,
    email: &str,
    timeouts: &Timeouts,
) -> StepResult {
    request_certificate(shell, domain, email, timeouts).result
}

/// Install certbot if needed, stop Nginx, request the certificate and
/// start Nginx again.
#[must_use]
pub fn request_certificate(
    shell: &dyn RemoteShell,
    domain: &str,
    email: &str,
    timeouts: &Timeouts,
) -> CertificateRun {
    let mut run = Run {
        states: vec![CertState::NotStarted],
        restarted: None,
        warnings: Warnings::new(),
    };

    let result = run.provision(shell, domain, email, timeouts);
    run.advance(if result.is_ok() {
        CertState::Done
    } else {
        CertState::Failed
    });

    match &result {
        Ok(_) => tracing::info!(%domain, restarted = ?run.restarted, "certificate issued"),
        Err(e) => tracing::warn!(
            %domain,
            restarted = ?run.restarted,
            error = %e,
            "certificate not issued"
        ),
    }

    CertificateRun {
        states: run.states,
        restarted: run.restarted,
        result: StepResult::from_result(result, run.warnings.into_inner()),
    }
}

struct Run {
    states: Vec<CertState>,
    restarted: Option<bool>,
    warnings: Warnings,
}

impl Run {
    fn advance(&mut self, state: CertState) {
        tracing::debug!(?state, "certificate request");
        self.states.push(state);
    }

    fn provision(
        &mut self,
        shell: &dyn RemoteShell,
        domain: &str,
        email: &str,
        timeouts: &Timeouts,
    ) -> DeployResult<String> {
        validate::validate_host(domain)?;
        validate::validate_email(email)?;

        self.advance(CertState::ToolCheck);
        if !cmd::probe(shell, "which certbot", timeouts.probe)? {
            self.advance(CertState::Installing);
            install_certbot(shell, timeouts.install)?;
        }

        match cmd::sudo(shell, "systemctl stop nginx", timeouts.vhost) {
            Ok(output) if !output.success() => {
                tracing::debug!(stderr = %output.diagnostics(), "nginx was not stopped");
            }
            Err(e) => tracing::debug!(error = %e, "nginx was not stopped"),
            Ok(_) => {}
        }
        self.advance(CertState::ServerStopped);

        self.advance(CertState::Requesting);
        let request = cmd::sudo(shell, &certbot_command(domain, email), timeouts.certificate);
        self.restart_server(shell, timeouts.vhost);

        let output = request?;
        if !output.success() {
            return Err(DeployError::Certificate(CertFailure::classify(
                output.diagnostics(),
            )));
        }
        Ok(format!("SSL certificate issued for {domain}"))
    }

    fn restart_server(&mut self, shell: &dyn RemoteShell, timeout: Duration) {
        let started = cmd::sudo(shell, "systemctl start nginx", timeout);
        let ok = matches!(&started, Ok(output) if output.success());
        if !ok {
            let reason = match &started {
                Ok(output) => output.diagnostics().to_string(),
                Err(e) => e.to_string(),
            };
            self.warnings.push(format!(
                "nginx could not be started again ({reason}). \
                 Run `sudo systemctl start nginx` on the server"
            ));
        }
        self.restarted = Some(ok);
        self.advance(CertState::ServerRestarted);
    }
}

fn install_certbot(shell: &dyn RemoteShell, timeout: Duration) -> DeployResult<()> {
    tracing::info!("installing certbot");
    let install_failed = |output: &CommandOutput| {
        DeployError::Certificate(CertFailure::InstallFailed(
            output.diagnostics().to_string(),
        ))
    };

    let update = cmd::sudo(shell, "apt-get update", timeout)?;
    if !update.success() {
        return Err(install_failed(&update));
    }
    let install = cmd::sudo(
        shell,
        &format!("apt-get install -y {CERTBOT_PACKAGES}"),
        timeout,
    )?;
    if !install.success() {
        return Err(install_failed(&install));
    }
    Ok(())
}
