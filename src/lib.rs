//! Publish static site bundles to a VPS over SSH.
//!
//! Pagelift takes the zip bundle produced by a site editor
//! (`index.html`, an optional `styles.css` and an optional flat
//! `images/` directory) and makes it servable on a remote Linux host:
//! files are uploaded over SFTP, ownership and modes are repaired,
//! a Let's Encrypt certificate is optionally requested and an Nginx
//! virtual host is optionally written and activated.
//!
//! # Overview
//!
//! A deploy is described by a [`DeployTarget`] and run by
//! [`deploy_site`]. The stages share one [`SshSession`] and each
//! reports a [`StepResult`]:
//!
//! 1. **Upload** - [`deploy::deploy_bundle`]
//! 2. **Certificate** - [`certificate::obtain_certificate`]
//! 3. **Virtual host** - [`vhost::publish_vhost`]
//!
//! The stages talk to the server through the [`RemoteShell`] trait,
//! so they can run against anything that executes commands and
//! stores files.
//!
//! # Examples
//!
//! ## Deploy with a domain and HTTPS
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use pagelift::{DeployTarget, Timeouts, deploy_site};
//!
//! let target = DeployTarget::new("203.0.113.7", "deploy", "s3cret", "/var/www/shop")
//!     .domain("shop.example.com")
//!     .email("owner@example.com")
//!     .ssl()
//!     .vhost();
//!
//! let outcome = deploy_site(&target, Path::new("site.zip"), &Timeouts::default());
//! println!("{} -> {}", outcome.message, outcome.url);
//! ```
//!
//! ## Deploy onto a stored server
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use pagelift::{ServerProfile, Timeouts, deploy_to_profile};
//!
//! fn main() -> anyhow::Result<()> {
//!     let profile = ServerProfile::load(Path::new("builder.json"))?;
//!     let outcome = deploy_to_profile(
//!         &profile,
//!         "landing-7",
//!         Path::new("site.zip"),
//!         &Timeouts::default(),
//!     );
//!     assert!(outcome.ok, "{}", outcome.message);
//!     Ok(())
//! }
//! ```
//!
//! ## Preview the virtual host
//!
//! ```rust
//! use pagelift::VHostConfig;
//!
//! let config = VHostConfig::for_site("shop.example.com", "/var/www/shop", false, None);
//! assert!(config.render().contains("root /var/www/shop;"));
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod bundle;
pub mod certificate;
pub mod cli;
pub mod cmd;
pub mod deploy;
pub mod error;
pub mod nginx;
pub mod pipeline;
pub mod ssh;
pub mod step;
pub mod target;
pub mod validate;
pub mod vhost;

pub use bundle::ExtractedBundle;
pub use certificate::{CertState, CertificateRun};
pub use cmd::Escalation;
pub use error::{CertFailure, DeployError, DeployResult, FailureKind};
pub use nginx::VHostConfig;
pub use pipeline::{DeployOutcome, deploy_site, deploy_to_profile, run_stages};
pub use ssh::{CommandOutput, RemoteShell, SshSession};
pub use step::StepResult;
pub use target::{DeployTarget, ServerProfile, Timeouts};
