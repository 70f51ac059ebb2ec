use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use ssh2::{ErrorCode, HashType, Session, Sftp};

use crate::error::{DeployError, DeployResult};
use crate::target::DeployTarget;
use crate::validate;

/// `LIBSSH2_ERROR_TIMEOUT`
const SESSION_TIMEOUT_CODE: i32 = -9;

/// Exit code and decoded output streams of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr if the command printed any, stdout otherwise.
    #[must_use]
    pub fn diagnostics(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// A remote shell the deploy stages talk to.
///
/// [`SshSession`] is the production implementation; anything that can
/// run a command and place a file on the target can stand in for it.
pub trait RemoteShell {
    /// The account commands run as.
    fn username(&self) -> &str;

    /// Password fed to `sudo -S`, if one is known.
    fn sudo_password(&self) -> Option<&str>;

    /// Run one command, write `input` to its stdin, and wait for it to
    /// exit with both output streams drained.
    fn execute_with_input(
        &self,
        command: &str,
        input: &[u8],
        timeout: Duration,
    ) -> DeployResult<CommandOutput>;

    /// Copy a local file to `remote_path`.
    fn upload(&self, local_path: &Path, remote_path: &str) -> DeployResult<()>;

    /// Create or replace `remote_path` with `content`.
    fn write_file(&self, content: &[u8], remote_path: &str) -> DeployResult<()>;

    fn execute(&self, command: &str, timeout: Duration) -> DeployResult<CommandOutput> {
        self.execute_with_input(command, &[], timeout)
    }
}

/// SFTP sub-channel of an [`SshSession`]. Closed when dropped.
pub struct FileChannel {
    sftp: Sftp,
}

impl FileChannel {
    pub fn upload(&self, local_path: &Path, remote_path: &str) -> DeployResult<()> {
        let mut local = File::open(local_path).map_err(|_| {
            DeployError::FileNotFound(local_path.display().to_string())
        })?;
        let mut remote = self
            .sftp
            .create(Path::new(remote_path))
            .map_err(|e| DeployError::remote(&format!("upload {remote_path}"), &e.to_string()))?;
        io::copy(&mut local, &mut remote)
            .map_err(|e| DeployError::remote(&format!("upload {remote_path}"), &e.to_string()))?;
        Ok(())
    }

    pub fn write(&self, content: &[u8], remote_path: &str) -> DeployResult<()> {
        let mut remote = self
            .sftp
            .create(Path::new(remote_path))
            .map_err(|e| DeployError::remote(&format!("write {remote_path}"), &e.to_string()))?;
        remote
            .write_all(content)
            .map_err(|e| DeployError::remote(&format!("write {remote_path}"), &e.to_string()))?;
        Ok(())
    }

    /// Size of a remote file, `None` if it cannot be stat'ed.
    #[must_use]
    pub fn size(&self, remote_path: &str) -> Option<u64> {
        self.sftp
            .stat(Path::new(remote_path))
            .ok()
            .and_then(|stat| stat.size)
    }
}

/// Authenticated SSH connection to one deploy target.
///
/// Only password authentication is attempted: no key files, no agent.
/// The server's host key is accepted without verification; its
/// fingerprint is logged on connect.
pub struct SshSession {
    session: Session,
    host: String,
    user: String,
    password: SecretString,
    files: RefCell<Option<FileChannel>>,
    closed: bool,
}

impl fmt::Debug for SshSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SshSession {
    /// Validate the target's addressing, connect, and authenticate.
    pub fn open(target: &DeployTarget, timeout: Duration) -> DeployResult<Self> {
        validate::validate_host(&target.host)?;
        validate::validate_username(&target.username)?;
        validate::validate_port(target.port)?;
        if target.password.expose_secret().is_empty() {
            return Err(DeployError::InvalidInput(
                "SSH password must not be empty".into(),
            ));
        }

        tracing::info!(
            host = %target.host,
            port = target.port,
            user = %target.username,
            "connecting"
        );

        let tcp = connect_tcp(&target.host, target.port, timeout)?;

        let mut session = Session::new()
            .map_err(|e| DeployError::Connection(format!("cannot create SSH session: {e}")))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(timeout));
        session.handshake().map_err(|e| {
            DeployError::Connection(format!("SSH handshake with {} failed: {e}", target.host))
        })?;

        if let Some(hash) = session.host_key_hash(HashType::Sha256) {
            tracing::info!(
                host = %target.host,
                fingerprint = %fingerprint(hash),
                "accepting host key without verification"
            );
        }

        session
            .userauth_password(&target.username, target.password.expose_secret())
            .map_err(|e| {
                DeployError::Auth(format!(
                    "{}@{} rejected the password ({e}). Check the user and password",
                    target.username, target.host
                ))
            })?;
        if !session.authenticated() {
            return Err(DeployError::Auth(format!(
                "{}@{} did not accept password authentication",
                target.username, target.host
            )));
        }

        tracing::info!(host = %target.host, user = %target.username, "connected");

        Ok(Self {
            session,
            host: target.host.clone(),
            user: target.username.clone(),
            password: target.password.clone(),
            files: RefCell::new(None),
            closed: false,
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Open a fresh SFTP sub-channel.
    pub fn open_file_channel(&self) -> DeployResult<FileChannel> {
        self.ensure_open()?;
        let sftp = self
            .session
            .sftp()
            .map_err(|e| DeployError::Connection(format!("cannot open SFTP channel: {e}")))?;
        Ok(FileChannel { sftp })
    }

    /// Release the file channel and disconnect. Safe to call more than
    /// once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.files.borrow_mut().take();
        if let Err(e) = self.session.disconnect(None, "deploy finished", None) {
            tracing::debug!(host = %self.host, error = %e, "disconnect failed");
        }
        self.closed = true;
        tracing::debug!(host = %self.host, "session closed");
    }

    fn ensure_open(&self) -> DeployResult<()> {
        if self.closed {
            Err(DeployError::Connection(format!(
                "session to {} is closed",
                self.host
            )))
        } else {
            Ok(())
        }
    }

    fn with_files<T>(&self, f: impl FnOnce(&FileChannel) -> DeployResult<T>) -> DeployResult<T> {
        let mut slot = self.files.borrow_mut();
        if slot.is_none() {
            *slot = Some(self.open_file_channel()?);
        }
        match slot.as_ref() {
            Some(channel) => f(channel),
            None => Err(DeployError::Connection("SFTP channel unavailable".into())),
        }
    }

    fn transport_error(&self, error: &io::Error, command: &str, timeout: Duration) -> DeployError {
        if error.kind() == io::ErrorKind::TimedOut {
            DeployError::Timeout {
                command: command.to_string(),
                seconds: timeout.as_secs(),
            }
        } else {
            DeployError::Connection(format!("lost connection to {}: {error}", self.host))
        }
    }

    fn ssh_error(&self, error: &ssh2::Error, command: &str, timeout: Duration) -> DeployError {
        if error.code() == ErrorCode::Session(SESSION_TIMEOUT_CODE) {
            DeployError::Timeout {
                command: command.to_string(),
                seconds: timeout.as_secs(),
            }
        } else {
            DeployError::Connection(format!("{}: {error}", self.host))
        }
    }
}

impl RemoteShell for SshSession {
    fn username(&self) -> &str {
        &self.user
    }

    fn sudo_password(&self) -> Option<&str> {
        Some(self.password.expose_secret())
    }

    fn execute_with_input(
        &self,
        command: &str,
        input: &[u8],
        timeout: Duration,
    ) -> DeployResult<CommandOutput> {
        self.ensure_open()?;
        self.session.set_timeout(millis(timeout));
        tracing::debug!(host = %self.host, %command, "exec");

        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| self.ssh_error(&e, command, timeout))?;
        channel
            .exec(command)
            .map_err(|e| self.ssh_error(&e, command, timeout))?;

        if !input.is_empty() {
            channel
                .write_all(input)
                .map_err(|e| self.transport_error(&e, command, timeout))?;
        }
        channel
            .send_eof()
            .map_err(|e| self.ssh_error(&e, command, timeout))?;

        let mut stdout = Vec::new();
        channel
            .read_to_end(&mut stdout)
            .map_err(|e| self.transport_error(&e, command, timeout))?;
        let mut stderr = Vec::new();
        channel
            .stderr()
            .read_to_end(&mut stderr)
            .map_err(|e| self.transport_error(&e, command, timeout))?;

        channel
            .wait_close()
            .map_err(|e| self.ssh_error(&e, command, timeout))?;
        let exit_code = channel
            .exit_status()
            .map_err(|e| self.ssh_error(&e, command, timeout))?;

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> DeployResult<()> {
        self.with_files(|files| files.upload(local_path, remote_path))
    }

    fn write_file(&self, content: &[u8], remote_path: &str) -> DeployResult<()> {
        self.with_files(|files| files.write(content, remote_path))
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> DeployResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| DeployError::Connection(format!("cannot resolve {host}: {e}")))?
        .collect();

    let mut last_error = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(DeployError::Connection(match last_error {
        Some(e) => format!("cannot reach {host}:{port}: {e}"),
        None => format!("{host} resolved to no addresses"),
    }))
}

fn millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn fingerprint(hash: &[u8]) -> String {
    hash.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
