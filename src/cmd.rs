use std::time::Duration;

use crate::error::{DeployError, DeployResult};
use crate::ssh::{CommandOutput, RemoteShell};
use crate::validate::shell_quote;

/// Which form of a command to try first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// `sudo` first, then the plain command. Used for ownership and
    /// permission changes.
    ElevatedFirst,
    /// Plain command first, then `sudo`. Used for Nginx and systemd
    /// calls that usually work unprivileged as root.
    PlainFirst,
}

/// Run a command through `sudo`.
///
/// With a known password the command runs as `sudo -S` and the password
/// is fed on stdin; without one `sudo -n` fails fast instead of
/// prompting.
pub fn sudo(
    shell: &dyn RemoteShell,
    command: &str,
    timeout: Duration,
) -> DeployResult<CommandOutput> {
    match shell.sudo_password() {
        Some(password) => {
            let input = format!("{password}\n");
            shell.execute_with_input(
                &format!("sudo -S -p '' {command}"),
                input.as_bytes(),
                timeout,
            )
        }
        None => shell.execute(&format!("sudo -n {command}"), timeout),
    }
}

/// Run a command in both forms until one succeeds.
///
/// Returns the output of the first attempt that exits with status 0.
/// If both fail, the error carries the second attempt's output only.
/// Transport errors and timeouts are returned as-is without a retry.
pub fn run_with_fallback(
    shell: &dyn RemoteShell,
    command: &str,
    escalation: Escalation,
    timeout: Duration,
) -> DeployResult<CommandOutput> {
    let first = attempt(shell, command, escalation, true, timeout)?;
    if first.success() {
        return Ok(first);
    }
    tracing::debug!(
        %command,
        exit_code = first.exit_code,
        "first attempt failed, retrying in the other form"
    );

    let second = attempt(shell, command, escalation, false, timeout)?;
    if second.success() {
        Ok(second)
    } else {
        Err(DeployError::remote(command, second.diagnostics()))
    }
}

/// Run a command and fail on a non-zero exit code.
pub fn run_checked(
    shell: &dyn RemoteShell,
    command: &str,
    timeout: Duration,
) -> DeployResult<CommandOutput> {
    let output = shell.execute(command, timeout)?;
    if output.success() {
        Ok(output)
    } else {
        Err(DeployError::remote(command, output.diagnostics()))
    }
}

/// Exit status of a test-style probe (`test -f`, `test -r`, ...).
pub fn probe(shell: &dyn RemoteShell, command: &str, timeout: Duration) -> DeployResult<bool> {
    Ok(shell.execute(command, timeout)?.success())
}

/// Byte size of a remote file, `None` if it does not exist.
pub fn remote_size(
    shell: &dyn RemoteShell,
    path: &str,
    timeout: Duration,
) -> DeployResult<Option<u64>> {
    let output = shell.execute(&format!("stat -c %s {}", shell_quote(path)), timeout)?;
    if !output.success() {
        return Ok(None);
    }
    Ok(output.stdout.trim().parse().ok())
}

fn attempt(
    shell: &dyn RemoteShell,
    command: &str,
    escalation: Escalation,
    first: bool,
    timeout: Duration,
) -> DeployResult<CommandOutput> {
    let elevated = matches!(
        (escalation, first),
        (Escalation::ElevatedFirst, true) | (Escalation::PlainFirst, false)
    );
    if elevated {
        sudo(shell, command, timeout)
    } else {
        shell.execute(command, timeout)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::Path;

    use super::*;

    /// Succeeds only for commands that start with `ok_prefix`.
    struct Recorder {
        ok_prefix: &'static str,
        password: Option<&'static str>,
        log: RefCell<Vec<(String, Vec<u8>)>>,
    }

    impl Recorder {
        fn new(ok_prefix: &'static str) -> Self {
            Self {
                ok_prefix,
                password: Some("pw"),
                log: RefCell::new(Vec::new()),
            }
        }

        fn commands(&self) -> Vec<String> {
            self.log.borrow().iter().map(|(c, _)| c.clone()).collect()
        }
    }

    impl RemoteShell for Recorder {
        fn username(&self) -> &str {
            "deploy"
        }

        fn sudo_password(&self) -> Option<&str> {
            self.password
        }

        fn execute_with_input(
            &self,
            command: &str,
            input: &[u8],
            _timeout: Duration,
        ) -> DeployResult<CommandOutput> {
            self.log
                .borrow_mut()
                .push((command.to_string(), input.to_vec()));
            let ok = command.starts_with(self.ok_prefix);
            Ok(CommandOutput {
                exit_code: i32::from(!ok),
                stdout: String::new(),
                stderr: format!("denied: {command}"),
            })
        }

        fn upload(&self, _: &Path, _: &str) -> DeployResult<()> {
            Ok(())
        }

        fn write_file(&self, _: &[u8], _: &str) -> DeployResult<()> {
            Ok(())
        }
    }

    const T: Duration = Duration::from_secs(5);

    #[test]
    fn elevated_first_succeeds_without_retry() {
        let shell = Recorder::new("sudo");
        run_with_fallback(&shell, "chmod 755 /srv/a", Escalation::ElevatedFirst, T).unwrap();

        assert_eq!(shell.commands(), vec!["sudo -S -p '' chmod 755 /srv/a"]);
        assert_eq!(shell.log.borrow()[0].1, b"pw\n");
    }

    #[test]
    fn elevated_first_falls_back_to_plain() {
        let shell = Recorder::new("chmod");
        run_with_fallback(&shell, "chmod 755 /srv/a", Escalation::ElevatedFirst, T).unwrap();

        assert_eq!(
            shell.commands(),
            vec!["sudo -S -p '' chmod 755 /srv/a", "chmod 755 /srv/a"]
        );
    }

    #[test]
    fn plain_first_falls_back_to_sudo() {
        let shell = Recorder::new("sudo");
        run_with_fallback(&shell, "nginx -t", Escalation::PlainFirst, T).unwrap();

        assert_eq!(shell.commands(), vec!["nginx -t", "sudo -S -p '' nginx -t"]);
    }

    #[test]
    fn both_failing_reports_last_attempt() {
        let shell = Recorder::new("never");
        let err = run_with_fallback(&shell, "nginx -t", Escalation::PlainFirst, T).unwrap_err();

        match err {
            DeployError::RemoteCommand { command, stderr } => {
                assert_eq!(command, "nginx -t");
                assert_eq!(stderr, "denied: sudo -S -p '' nginx -t");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sudo_without_password_is_non_interactive() {
        let mut shell = Recorder::new("sudo");
        shell.password = None;
        sudo(&shell, "systemctl stop nginx", T).unwrap();

        assert_eq!(shell.commands(), vec!["sudo -n systemctl stop nginx"]);
    }
}
