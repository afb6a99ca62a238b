//! Steps run once a patch session has completed: the optional Razor plugin,
//! the client settings profile, and the executable bit on the client binary.
//!
//! Every step is best effort. Failures are logged and reported back, but
//! never undo a completed patch.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::downloader::{DownloadError, Downloader};

pub const RAZOR_URL: &str =
    "https://github.com/markdwags/Razor/releases/download/v1.9.77.0/Razor-x64-1.9.77.0.zip";
const RAZOR_NAME: &str = "Razor-x64-1.9.77.0";
const CLIENT_DIR: &str = "ClassicUO";
const CLIENT_BINARY: &str =
    if cfg!(target_os = "macos") { "ClassicUO.bin.osx" } else { "ClassicUO.bin.x86_64" };

#[derive(Debug, Error)]
pub enum PostInstallError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A zip archive fetched once and unpacked into `extract_dir`.
#[derive(Debug, Clone)]
pub struct PluginArchive {
    pub url: String,
    pub archive_path: PathBuf,
    pub extract_dir: PathBuf,
}

/// Copies one of two settings files depending on whether the plugin is used.
#[derive(Debug, Clone)]
pub struct SettingsProfile {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct PostInstall {
    pub plugin: Option<PluginArchive>,
    pub settings: Option<SettingsProfile>,
    pub executable: Option<PathBuf>,
}

/// What happened to each step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostInstallReport {
    pub plugin_installed: bool,
    pub settings_copied: bool,
    pub executable_marked: bool,
    pub errors: Vec<String>,
}

impl PostInstall {
    /// The ClassicUO layout the launcher ships for: Razor under
    /// `ClassicUO/Data/Plugins`, `settings.json` or `settings_no_razor.json`
    /// taken from `profile_dir`.
    pub fn classicuo(install_root: &Path, profile_dir: &Path, with_razor: bool) -> Self {
        let client_dir = install_root.join(CLIENT_DIR);
        let plugins = client_dir.join("Data").join("Plugins");
        let profile = if with_razor { "settings.json" } else { "settings_no_razor.json" };
        Self {
            plugin: Some(PluginArchive {
                url: RAZOR_URL.to_string(),
                archive_path: plugins.join(format!("{}.zip", RAZOR_NAME)),
                extract_dir: plugins.join(RAZOR_NAME),
            }),
            settings: Some(SettingsProfile {
                source: profile_dir.join(profile),
                destination: client_dir.join("settings.json"),
            }),
            executable: Some(client_dir.join(CLIENT_BINARY)),
        }
    }

    pub async fn run(&self, downloader: &Downloader, cancel: &CancellationToken) -> PostInstallReport {
        let mut report = PostInstallReport::default();

        if let Some(plugin) = &self.plugin {
            match install_plugin(downloader, plugin, cancel).await {
                Ok(installed) => report.plugin_installed = installed,
                Err(e) => {
                    warn!(url = %plugin.url, error = %e, "plugin install failed");
                    report.errors.push(format!("plugin: {}", e));
                }
            }
        }

        if let Some(settings) = &self.settings {
            match copy_settings(settings).await {
                Ok(copied) => report.settings_copied = copied,
                Err(e) => {
                    warn!(error = %e, "copying settings failed");
                    report.errors.push(format!("settings: {}", e));
                }
            }
        }

        if let Some(binary) = &self.executable {
            match mark_executable(binary).await {
                Ok(marked) => report.executable_marked = marked,
                Err(e) => {
                    warn!(path = %binary.display(), error = %e, "could not mark client executable");
                    report.errors.push(format!("executable: {}", e));
                }
            }
        }

        report
    }
}

/// Returns `false` when the plugin was already unpacked.
pub async fn install_plugin(
    downloader: &Downloader,
    plugin: &PluginArchive,
    cancel: &CancellationToken,
) -> Result<bool, PostInstallError> {
    if tokio::fs::try_exists(&plugin.extract_dir).await? {
        info!(path = %plugin.extract_dir.display(), "plugin already present");
        return Ok(false);
    }
    // The extract dir doubles as the "installed" marker, so it is only
    // created by a successful extraction.
    if let Some(parent) = plugin.archive_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    downloader.download_to(&plugin.url, &plugin.archive_path, cancel, |_| {}).await?;

    let archive_path = plugin.archive_path.clone();
    let extract_dir = plugin.extract_dir.clone();
    tokio::task::spawn_blocking(move || -> Result<(), PostInstallError> {
        let file = std::fs::File::open(&archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        archive.extract(&extract_dir)?;
        Ok(())
    })
    .await??;

    tokio::fs::remove_file(&plugin.archive_path).await?;
    info!(path = %plugin.extract_dir.display(), "plugin installed");
    Ok(true)
}

/// Returns `false` when the source profile does not exist.
pub async fn copy_settings(settings: &SettingsProfile) -> Result<bool, PostInstallError> {
    if !tokio::fs::try_exists(&settings.source).await? {
        warn!(path = %settings.source.display(), "settings profile not found");
        return Ok(false);
    }
    if let Some(parent) = settings.destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(&settings.source, &settings.destination).await?;
    Ok(true)
}

/// Returns `false` when the binary is missing or the platform has no mode bits.
pub async fn mark_executable(path: &Path) -> Result<bool, PostInstallError> {
    if !tokio::fs::try_exists(path).await? {
        warn!(path = %path.display(), "client binary not found");
        return Ok(false);
    }
    set_mode_755(path).await
}

#[cfg(unix)]
async fn set_mode_755(path: &Path) -> Result<bool, PostInstallError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(true)
}

#[cfg(not(unix))]
async fn set_mode_755(_path: &Path) -> Result<bool, PostInstallError> {
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classicuo_layout() {
        let steps = PostInstall::classicuo(Path::new("/games/shard"), Path::new("/opt/launcher/config"), false);
        let plugin = steps.plugin.unwrap();
        assert_eq!(plugin.extract_dir, PathBuf::from("/games/shard/ClassicUO/Data/Plugins/Razor-x64-1.9.77.0"));
        let settings = steps.settings.unwrap();
        assert_eq!(settings.source, PathBuf::from("/opt/launcher/config/settings_no_razor.json"));
        assert_eq!(settings.destination, PathBuf::from("/games/shard/ClassicUO/settings.json"));
        let binary = steps.executable.unwrap();
        let expected = if cfg!(target_os = "macos") { "ClassicUO.bin.osx" } else { "ClassicUO.bin.x86_64" };
        assert_eq!(binary, PathBuf::from("/games/shard/ClassicUO").join(expected));
    }

    #[tokio::test]
    async fn copies_existing_profile_only() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsProfile {
            source: dir.path().join("settings.json"),
            destination: dir.path().join("client/settings.json"),
        };
        assert!(!copy_settings(&settings).await.unwrap());

        tokio::fs::write(&settings.source, b"{}").await.unwrap();
        assert!(copy_settings(&settings).await.unwrap());
        assert_eq!(tokio::fs::read(&settings.destination).await.unwrap(), b"{}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn marks_binary_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join(CLIENT_BINARY);
        assert!(!mark_executable(&binary).await.unwrap());

        tokio::fs::write(&binary, b"\x7fELF").await.unwrap();
        assert!(mark_executable(&binary).await.unwrap());
        let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn existing_plugin_dir_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = PluginArchive {
            // Never contacted: the extract dir already exists.
            url: "http://127.0.0.1:9/plugin.zip".to_string(),
            archive_path: dir.path().join("plugin.zip"),
            extract_dir: dir.path().join("plugin"),
        };
        tokio::fs::create_dir_all(&plugin.extract_dir).await.unwrap();

        let downloader = Downloader::new(Default::default()).unwrap();
        let installed = install_plugin(&downloader, &plugin, &CancellationToken::new()).await.unwrap();
        assert!(!installed);
    }
}
