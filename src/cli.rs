//! Command-line front end standing in for the web layer's deploy
//! request handler.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::DeployError;
use crate::nginx::{self, VHostConfig};
use crate::pipeline::{self, DeployOutcome};
use crate::target::{DeployTarget, PASSWORD_ENV, ServerProfile, Timeouts};
use crate::validate;

#[derive(Parser)]
#[command(name = "pagelift")]
#[command(about = "Publish static site bundles to a VPS")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy to a server given on the command line. The SSH password
    /// is read from PAGELIFT_SSH_PASSWORD.
    Deploy {
        /// Site bundle (zip)
        bundle: PathBuf,

        /// Hostname or IP address
        #[arg(long)]
        host: String,

        #[arg(long, default_value_t = 22)]
        port: u16,

        /// SSH user
        #[arg(long)]
        user: String,

        /// Absolute directory the site is published into
        #[arg(long)]
        path: String,

        /// Domain the site is served under
        #[arg(long)]
        domain: Option<String>,

        /// Contact email for Let's Encrypt
        #[arg(long)]
        email: Option<String>,

        /// Request a Let's Encrypt certificate
        #[arg(long)]
        ssl: bool,

        /// Generate and activate an Nginx virtual host
        #[arg(long)]
        vhost: bool,

        /// File name of the virtual host config
        #[arg(long)]
        vhost_name: Option<String>,
    },

    /// Deploy onto a stored server profile
    DeployProfile {
        /// Server profile (JSON)
        profile: PathBuf,

        /// Site bundle (zip)
        bundle: PathBuf,

        /// Site directory name under the profile's deploy path
        #[arg(long, conflicts_with = "title")]
        site: Option<String>,

        /// Project id, used with --title to derive the site name
        #[arg(long, requires = "title")]
        project_id: Option<u64>,

        /// Owner id appended to the derived site name
        #[arg(long, requires = "title")]
        user_id: Option<u64>,

        /// Project title, used with --project-id and --user-id to derive
        /// the site name
        #[arg(long, requires = "project_id", requires = "user_id")]
        title: Option<String>,
    },

    /// Print the Nginx config a deploy would install
    RenderVhost {
        /// Domain or IP address
        domain: String,

        /// Document root
        #[arg(long)]
        path: String,

        #[arg(long)]
        ssl: bool,

        /// Explicit config file name
        #[arg(long)]
        name: Option<String>,
    },
}

/// Install the global subscriber. `RUST_LOG` wins over the `info`
/// default.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

/// Parse arguments and dispatch.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    dispatch(cli.command)
}

fn dispatch(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Deploy {
            bundle,
            host,
            port,
            user,
            path,
            domain,
            email,
            ssl,
            vhost,
            vhost_name,
        } => {
            let password = std::env::var(PASSWORD_ENV)
                .map_err(|_| DeployError::EnvMissing(PASSWORD_ENV.into()))?;

            let mut target = DeployTarget::new(&host, &user, &password, &path).port(port);
            if let Some(domain) = &domain {
                target = target.domain(domain);
            }
            if let Some(email) = &email {
                target = target.email(email);
            }
            if ssl {
                target = target.ssl();
            }
            if vhost {
                target = target.vhost();
            }
            if let Some(name) = &vhost_name {
                target = target.vhost_name(name);
            }

            report(&pipeline::deploy_site(&target, &bundle, &Timeouts::default()))
        }
        Command::DeployProfile {
            profile,
            bundle,
            site,
            project_id,
            user_id,
            title,
        } => {
            let profile = ServerProfile::load(&profile)?;
            let site = match (site, project_id, user_id, title) {
                (Some(site), ..) => site,
                (None, Some(project), Some(user), Some(title)) => {
                    validate::site_slug(project, user, &title)
                }
                _ => anyhow::bail!(
                    "either --site or --project-id, --user-id and --title are required"
                ),
            };

            report(&pipeline::deploy_to_profile(
                &profile,
                &site,
                &bundle,
                &Timeouts::default(),
            ))
        }
        Command::RenderVhost {
            domain,
            path,
            ssl,
            name,
        } => {
            validate::validate_host(&domain)?;
            validate::validate_deploy_path(&path)?;
            if let Some(name) = &name {
                validate::validate_config_name(name)?;
            }

            let file_name = nginx::config_file_name(&domain, name.as_deref());
            let config = VHostConfig::for_site(&domain, &path, ssl, name.as_deref());

            eprintln!("--- {}/{file_name} ---", nginx::SITES_AVAILABLE);
            println!("{}", config.render());
            Ok(())
        }
    }
}

fn report(outcome: &DeployOutcome) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    if outcome.ok {
        Ok(())
    } else {
        anyhow::bail!("deploy failed: {}", outcome.upload.message)
    }
}
