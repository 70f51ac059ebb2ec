use std::fs::{self, File};
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

use crate::error::{DeployError, DeployResult};

pub const ENTRY_PAGE: &str = "index.html";
pub const STYLESHEET: &str = "styles.css";
pub const ASSET_DIR: &str = "images";

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// A site bundle unpacked into a scratch directory.
///
/// The directory is removed when the value is dropped, whichever way
/// the deploy ends.
#[derive(Debug)]
pub struct ExtractedBundle {
    dir: TempDir,
}

/// One file of the asset directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl ExtractedBundle {
    /// Unpack a zip archive. Fails with [`DeployError::BadBundle`] if
    /// the file is not a readable zip archive or holds symbolic links.
    pub fn extract(archive: &Path) -> DeployResult<Self> {
        let file = File::open(archive)
            .map_err(|_| DeployError::FileNotFound(archive.display().to_string()))?;
        let mut zip = ZipArchive::new(file)
            .map_err(|e| DeployError::BadBundle(format!("not a valid zip archive: {e}")))?;
        reject_links(&mut zip)?;

        let dir = tempfile::Builder::new().prefix("pagelift-").tempdir()?;
        zip.extract(dir.path())
            .map_err(|e| DeployError::BadBundle(format!("cannot unpack archive: {e}")))?;

        tracing::debug!(
            archive = %archive.display(),
            scratch = %dir.path().display(),
            entries = zip.len(),
            "bundle extracted"
        );

        Ok(Self { dir })
    }

    /// Check that `archive` is a zip with a non-empty entry page without
    /// unpacking it.
    pub fn check_archive(archive: &Path) -> DeployResult<()> {
        let file = File::open(archive)
            .map_err(|_| DeployError::FileNotFound(archive.display().to_string()))?;
        let mut zip = ZipArchive::new(file)
            .map_err(|e| DeployError::BadBundle(format!("not a valid zip archive: {e}")))?;
        reject_links(&mut zip)?;

        let size = zip.by_name(ENTRY_PAGE).map(|entry| entry.size()).map_err(|_| {
            DeployError::MissingEntryPoint(format!("the archive has no {ENTRY_PAGE}"))
        })?;
        if size == 0 {
            return Err(DeployError::MissingEntryPoint(format!(
                "{ENTRY_PAGE} in the archive is empty"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// The entry page. Must exist and be non-empty.
    pub fn entry_page(&self) -> DeployResult<PathBuf> {
        let path = self.root().join(ENTRY_PAGE);
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(path),
            Ok(meta) if meta.is_file() => Err(DeployError::MissingEntryPoint(format!(
                "{ENTRY_PAGE} in the archive is empty"
            ))),
            _ => Err(DeployError::MissingEntryPoint(format!(
                "the archive has no {ENTRY_PAGE}"
            ))),
        }
    }

    /// The stylesheet with its size, if the bundle has one.
    #[must_use]
    pub fn stylesheet(&self) -> Option<(PathBuf, u64)> {
        let path = self.root().join(STYLESHEET);
        let meta = fs::symlink_metadata(&path).ok()?;
        meta.is_file().then(|| (path, meta.len()))
    }

    /// Regular files of the asset directory, sorted by name. `None` if
    /// the bundle has no asset directory.
    pub fn assets(&self) -> DeployResult<Option<Vec<Asset>>> {
        let dir = self.root().join(ASSET_DIR);
        if !fs::symlink_metadata(&dir).is_ok_and(|meta| meta.is_dir()) {
            return Ok(None);
        }

        let mut assets = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            assets.push(Asset {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                size: meta.len(),
            });
        }
        assets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(assets))
    }
}

/// Link entries would be recreated as real links on extraction and
/// followed when the files are uploaded.
fn reject_links<R: Read + Seek>(zip: &mut ZipArchive<R>) -> DeployResult<()> {
    for index in 0..zip.len() {
        let entry = zip
            .by_index_raw(index)
            .map_err(|e| DeployError::BadBundle(format!("cannot read archive entry: {e}")))?;
        if entry.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            return Err(DeployError::BadBundle(format!(
                "{} is a symbolic link",
                entry.name()
            )));
        }
    }
    Ok(())
}
