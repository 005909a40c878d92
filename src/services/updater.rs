use std::io::copy;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error("Release metadata was missing an expected field: {0}")]
    MalformedRelease(String),

    #[error("Error creating destination file for a download: {0}")]
    ErrorCreatingDestinationFile(std::io::Error),

    #[error("Error during download copy into a destination file: {0}")]
    ErrorCopyingIntoDestinationFile(std::io::Error),

    #[error("Rename step '{step}' failed: {source}")]
    SwapFailed { step: &'static str, source: std::io::Error }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateChannel {
    /// Tagged GitHub releases.
    Stable,
    /// Whatever the tip of main is.
    Develop
}

#[derive(Clone, Debug)]
pub struct UpdaterConfig {
    pub api_base: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub channel: UpdateChannel
}

impl UpdaterConfig {
    pub fn new(repo_owner: &str, repo_name: &str, channel: UpdateChannel) -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            repo_owner: repo_owner.to_string(),
            repo_name: repo_name.to_string(),
            channel
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct AvailableUpdate {
    pub version: String,
    pub download_url: String
}

#[derive(Deserialize)]
struct GithubRelease {
    tag_name: String,
    assets: Vec<GithubAsset>
}

#[derive(Deserialize)]
struct GithubAsset {
    browser_download_url: String
}

#[derive(Deserialize)]
struct GithubCommit {
    sha: String
}

/// Version comparison is a plain string inequality; release tags are not
/// semver-ordered here, "different" is enough to offer the update.
pub fn check_for_update(config: &UpdaterConfig, current_version: &str) -> Result<Option<AvailableUpdate>, UpdateError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent("audiobook-organizer-updater")
        .build()?;

    let update = match config.channel {
        UpdateChannel::Stable => {
            let url = format!(
                "{}/repos/{}/{}/releases/latest",
                config.api_base, config.repo_owner, config.repo_name
            );
            let release: GithubRelease = client.get(&url).send()?.error_for_status()?.json()?;

            let asset = release.assets.first()
                .ok_or_else(|| UpdateError::MalformedRelease("release has no assets".to_string()))?;

            AvailableUpdate {
                version: release.tag_name,
                download_url: asset.browser_download_url.clone()
            }
        },
        UpdateChannel::Develop => {
            let url = format!(
                "{}/repos/{}/{}/commits/main",
                config.api_base, config.repo_owner, config.repo_name
            );
            let commit: GithubCommit = client.get(&url).send()?.error_for_status()?.json()?;
            let short_sha = commit.sha.chars().take(12).collect::<String>();

            AvailableUpdate {
                version: short_sha.clone(),
                download_url: format!(
                    "{}/repos/{}/{}/zipball/{}",
                    config.api_base, config.repo_owner, config.repo_name, short_sha
                )
            }
        }
    };

    if update.version == current_version {
        Ok(None)
    } else {
        Ok(Some(update))
    }
}

/// Installs a downloaded binary over the running executable with the
/// rename-swap dance: current -> `.old`, new -> current, then the `.old`
/// copy goes away on a best-effort basis. Any rename failure rolls the old
/// binary back into place before surfacing.
pub fn apply_update(download_url: &str, executable: &Path) -> Result<(), UpdateError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent("audiobook-organizer-updater")
        .build()?;

    let new_path = path_with_suffix(executable, ".new");
    let old_path = path_with_suffix(executable, ".old");

    let mut response = client.get(download_url).send()?.error_for_status()?;
    let mut destination = std::fs::File::create(&new_path)
        .map_err(UpdateError::ErrorCreatingDestinationFile)?;
    copy(&mut response, &mut destination)
        .map_err(UpdateError::ErrorCopyingIntoDestinationFile)?;
    drop(destination);

    std::fs::rename(executable, &old_path)
        .map_err(|source| UpdateError::SwapFailed { step: "current -> .old", source })?;

    if let Err(source) = std::fs::rename(&new_path, executable) {
        // Put the old binary back; a half-swapped executable is worse than
        // a failed update.
        if let Err(rollback_err) = std::fs::rename(&old_path, executable) {
            log::error!("Rollback of {} failed: {}", executable.display(), rollback_err);
        }
        return Err(UpdateError::SwapFailed { step: ".new -> current", source });
    }

    if let Err(err) = std::fs::remove_file(&old_path) {
        log::warn!("Could not delete {}: {}", old_path.display(), err);
    }

    Ok(())
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(suffix);
    PathBuf::from(os_string)
}
