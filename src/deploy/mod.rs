pub mod permissions;

use std::path::Path;
use std::time::Duration;

use crate::bundle::{ASSET_DIR, ENTRY_PAGE, ExtractedBundle, STYLESHEET};
use crate::cmd;
use crate::error::{DeployError, DeployResult};
use crate::ssh::RemoteShell;
use crate::step::{StepResult, Warnings};
use crate::validate::{self, shell_quote};

use self::permissions::SiteLayout;

/// Upload a site bundle to `base_path` and make it servable.
///
/// The bundle is unpacked into a scratch directory that is removed
/// before this returns. Validation and bundle problems are reported
/// before anything runs on the remote host.
#[must_use]
pub fn deploy_bundle(
    shell: &dyn RemoteShell,
    bundle: &Path,
    base_path: &str,
    username: &str,
    timeout: Duration,
) -> StepResult {
    let mut warnings = Warnings::new();
    let result = upload_site(shell, bundle, base_path, username, timeout, &mut warnings);
    if let Err(e) = &result {
        tracing::error!(path = %base_path, error = %e, "upload failed");
    }
    StepResult::from_result(result, warnings.into_inner())
}

fn upload_site(
    shell: &dyn RemoteShell,
    bundle: &Path,
    base_path: &str,
    username: &str,
    timeout: Duration,
    warnings: &mut Warnings,
) -> DeployResult<String> {
    validate::validate_deploy_path(base_path)?;
    validate::validate_username(username)?;

    let bundle = ExtractedBundle::extract(bundle)?;
    let entry_page = bundle.entry_page()?;

    tracing::info!(path = %base_path, "uploading site");

    prepare_base(shell, base_path, timeout, warnings)?;

    let mut layout = SiteLayout::new(base_path);

    let remote_entry = layout.entry_page();
    shell.upload(&entry_page, &remote_entry)?;
    if !cmd::probe(shell, &format!("test -f {}", shell_quote(&remote_entry)), timeout)? {
        return Err(DeployError::remote(
            &format!("upload {ENTRY_PAGE}"),
            &format!("{remote_entry} is missing after upload"),
        ));
    }

    layout.stylesheet = upload_stylesheet(shell, &bundle, &layout, timeout, warnings)?;

    if let Some(assets) = bundle.assets()? {
        let remote_dir = layout.asset_dir_path();
        cmd::run_checked(shell, &format!("mkdir -p {}", shell_quote(&remote_dir)), timeout)?;
        layout.asset_dir = true;

        for asset in assets {
            if asset.size == 0 {
                warnings.push(format!("{ASSET_DIR}/{} is empty, skipped", asset.name));
                continue;
            }

            let remote = format!("{remote_dir}/{}", asset.name);
            shell.upload(&asset.path, &remote)?;

            match cmd::remote_size(shell, &remote, timeout)? {
                Some(size) if size == asset.size => {
                    tracing::debug!(file = %remote, size, "asset uploaded");
                }
                remote_size => {
                    return Err(DeployError::AssetCorrupted(format!(
                        "{ASSET_DIR}/{}: local size {} bytes, on server {}",
                        asset.name,
                        asset.size,
                        remote_size.map_or_else(|| "missing".to_string(), |s| format!("{s} bytes"))
                    )));
                }
            }
            layout.assets.push(asset.name);
        }
    }

    permissions::repair(shell, &layout, username, timeout, warnings)?;
    verify_entry_page(shell, &layout, username, timeout, warnings)?;

    tracing::info!(path = %base_path, files = layout.files().len(), "site uploaded");
    Ok(format!("Site files uploaded to {base_path}"))
}

/// `mkdir -p`, `chmod 755`, then `chown` to the connecting user.
/// A permission-denied `chown` is tolerated.
fn prepare_base(
    shell: &dyn RemoteShell,
    base_path: &str,
    timeout: Duration,
    warnings: &mut Warnings,
) -> DeployResult<()> {
    let quoted = shell_quote(base_path);
    cmd::run_checked(shell, &format!("mkdir -p {quoted}"), timeout)?;
    cmd::run_checked(shell, &format!("chmod 755 {quoted}"), timeout)?;

    let chown = format!("chown -R $USER:$USER {quoted}");
    let output = shell.execute(&chown, timeout)?;
    if !output.success() {
        let diagnostics = output.diagnostics();
        if is_permission_denied(diagnostics) {
            warnings.push(format!(
                "could not take ownership of {base_path}: {diagnostics}"
            ));
        } else {
            return Err(DeployError::remote(&chown, diagnostics));
        }
    }
    Ok(())
}

/// Returns whether a stylesheet ended up on the server.
fn upload_stylesheet(
    shell: &dyn RemoteShell,
    bundle: &ExtractedBundle,
    layout: &SiteLayout,
    timeout: Duration,
    warnings: &mut Warnings,
) -> DeployResult<bool> {
    let Some((local, size)) = bundle.stylesheet() else {
        warnings.push(format!("the archive has no {STYLESHEET}"));
        return Ok(false);
    };

    if size == 0 {
        warnings.push(format!("{STYLESHEET} is empty, skipped"));
        return Ok(false);
    }

    let remote = layout.stylesheet_path();
    if let Err(e) = shell.upload(&local, &remote) {
        if matches!(e, DeployError::Connection(_) | DeployError::Timeout { .. }) {
            return Err(e);
        }
        warnings.push(format!("{STYLESHEET} could not be uploaded: {e}"));
        return Ok(false);
    }

    match cmd::remote_size(shell, &remote, timeout)? {
        None => {
            warnings.push(format!("{STYLESHEET} not found on the server after upload"));
            Ok(false)
        }
        Some(remote_size) if remote_size != size => {
            warnings.push(format!(
                "{STYLESHEET} size differs (local {size} bytes, on server {remote_size} bytes)"
            ));
            Ok(true)
        }
        Some(_) => {
            tracing::debug!(file = %remote, size, "stylesheet uploaded");
            Ok(true)
        }
    }
}

/// The entry page must exist and be non-empty; readability problems
/// are warnings after one corrective `chmod 644`.
fn verify_entry_page(
    shell: &dyn RemoteShell,
    layout: &SiteLayout,
    username: &str,
    timeout: Duration,
    warnings: &mut Warnings,
) -> DeployResult<()> {
    let entry = layout.entry_page();
    let quoted = shell_quote(&entry);

    if !cmd::probe(shell, &format!("test -f {quoted}"), timeout)? {
        return Err(DeployError::Verification(format!(
            "{entry} not found after upload"
        )));
    }

    match cmd::remote_size(shell, &entry, timeout)? {
        Some(0) | None => {
            return Err(DeployError::Verification(format!(
                "{entry} is empty on the server"
            )));
        }
        Some(size) => tracing::debug!(file = %entry, size, "entry page verified"),
    }

    let user_check = cmd::sudo(shell, &format!("-u {username} test -r {quoted}"), timeout)?;
    if !user_check.success() {
        warnings.push(format!(
            "{entry} may not be readable by {username}: {}",
            user_check.diagnostics()
        ));
    }

    let readable = permissions::remote_mode(shell, &entry, timeout)?
        .is_some_and(permissions::world_readable);
    if !readable {
        warnings.push(format!("{entry} is not world readable, fixing"));
        match permissions::chmod(shell, permissions::FILE_MODE, &entry, timeout) {
            Ok(()) => {}
            Err(DeployError::RemoteCommand { stderr, .. }) => {
                warnings.push(format!("could not make {entry} world readable: {stderr}"));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

fn is_permission_denied(diagnostics: &str) -> bool {
    diagnostics.contains("Permission denied") || diagnostics.contains("Operation not permitted")
}
