use serde::Serialize;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("SSH authentication failed: {0}")]
    Auth(String),

    #[error("SSH connection failed: {0}")]
    Connection(String),

    #[error("remote command timed out after {seconds}s: {command}")]
    Timeout { command: String, seconds: u64 },

    #[error("invalid bundle: {0}")]
    BadBundle(String),

    #[error("bundle has no entry page: {0}")]
    MissingEntryPoint(String),

    #[error("asset corrupted during upload: {0}")]
    AssetCorrupted(String),

    #[error("remote command failed: {command}: {stderr}")]
    RemoteCommand { command: String, stderr: String },

    #[error("certificate not obtained: {0}")]
    Certificate(CertFailure),

    #[error("nginx configuration is invalid: {0}")]
    ConfigSyntax(String),

    #[error("web server reload failed: {0}")]
    ServiceReload(String),

    #[error("site verification failed: {0}")]
    Verification(String),

    #[error("environment variable missing: {0}")]
    EnvMissing(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Build a [`DeployError::RemoteCommand`] from a command line and
    /// whatever the remote side printed.
    #[must_use]
    pub fn remote(command: &str, stderr: &str) -> Self {
        Self::RemoteCommand {
            command: command.to_string(),
            stderr: stderr.trim().to_string(),
        }
    }

    /// Machine-readable category, carried into [`StepResult`](crate::step::StepResult).
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput(_) => FailureKind::InvalidInput,
            Self::Auth(_) => FailureKind::Auth,
            Self::Connection(_) => FailureKind::Connection,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::BadBundle(_) => FailureKind::BadBundle,
            Self::MissingEntryPoint(_) => FailureKind::MissingEntryPoint,
            Self::AssetCorrupted(_) => FailureKind::AssetCorrupted,
            Self::RemoteCommand { .. } => FailureKind::RemoteCommand,
            Self::Certificate(cause) => FailureKind::Certificate(cause.category()),
            Self::ConfigSyntax(_) => FailureKind::ConfigSyntax,
            Self::ServiceReload(_) => FailureKind::ServiceReload,
            Self::Verification(_) => FailureKind::Verification,
            Self::EnvMissing(_) | Self::FileNotFound(_) | Self::Io(_) | Self::Json(_) => {
                FailureKind::Local
            }
        }
    }
}

/// Why a certificate request did not succeed.
///
/// The `Display` text is the guidance shown to the site owner.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertFailure {
    #[error(
        "certbot could not be installed: {0}. \
         Make sure the SSH user has sudo rights"
    )]
    InstallFailed(String),

    #[error(
        "port 80 is busy. Make sure Nginx or another web server \
         is stopped, or use the --webroot method"
    )]
    PortConflict,

    #[error(
        "the domain could not be reached. Make sure it points to \
         this server and port 80 is open in the firewall"
    )]
    Unreachable,

    #[error("Let's Encrypt rate limit reached. Try again later")]
    RateLimited,

    #[error("certbot error: {0}")]
    Other(String),
}

impl CertFailure {
    /// Classify certbot output into a failure cause.
    #[must_use]
    pub fn classify(output: &str) -> Self {
        let lower = output.to_lowercase();
        if lower.contains("port 80") || lower.contains("already in use") {
            Self::PortConflict
        } else if lower.contains("connection refused") {
            Self::Unreachable
        } else if lower.contains("rate limit") {
            Self::RateLimited
        } else {
            Self::Other(output.trim().to_string())
        }
    }

    #[must_use]
    pub const fn category(&self) -> CertCategory {
        match self {
            Self::InstallFailed(_) => CertCategory::InstallFailed,
            Self::PortConflict => CertCategory::PortConflict,
            Self::Unreachable => CertCategory::Unreachable,
            Self::RateLimited => CertCategory::RateLimited,
            Self::Other(_) => CertCategory::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertCategory {
    InstallFailed,
    PortConflict,
    Unreachable,
    RateLimited,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "cause")]
pub enum FailureKind {
    InvalidInput,
    Auth,
    Connection,
    Timeout,
    BadBundle,
    MissingEntryPoint,
    AssetCorrupted,
    RemoteCommand,
    Certificate(CertCategory),
    ConfigSyntax,
    ServiceReload,
    Verification,
    Local,
}
