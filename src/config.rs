//! Runner configuration: devices, the file-drop ingress, and image output.
//!
//! Loaded once per run from `config.production.json` (falling back to
//! `config.json`) under the run root, or from an explicit `--config` path.
//! The `{root}` placeholder in path values expands to the run root, so one
//! config file works across installations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ErrorCode, RunError};

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Configured inspection devices, by id.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,

    /// File-drop ingress the devices upload captures into. Absent (or
    /// explicitly disabled) means no step produces an image via file drop.
    #[serde(default)]
    pub ftp: Option<FtpConfig>,

    /// Global telemetry wait budget in milliseconds (per-device value wins).
    #[serde(default)]
    pub wait_for_results: Option<u64>,

    /// When set, the final image of each step is written here instead of
    /// being embedded into the result document. Supports `{root}`.
    #[serde(default)]
    pub write_last_image: Option<String>,
}

/// Static per-device configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Driver type tag, e.g. `keyence-cv-x`. Mapped onto the closed driver
    /// set at dispatch time; an unrecognized tag fails the step, not the
    /// config load.
    #[serde(rename = "type")]
    pub driver_type: String,

    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub pass: Option<String>,

    /// Local address the device pushes telemetry datagrams to.
    #[serde(default)]
    pub udp_host: Option<String>,

    #[serde(default)]
    pub udp_port: Option<u16>,

    /// Telemetry wait budget override in milliseconds.
    #[serde(default)]
    pub wait_for_results: Option<u64>,
}

/// The watched file-drop ingress. The transfer protocol itself runs in an
/// external server; the runner only reads the root directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Watched directory; defaults to `{root}/ftp`.
    #[serde(default)]
    pub root: Option<String>,

    /// Listen URL for the external ingress server. Unused by the runner.
    #[serde(default)]
    pub url: Option<String>,

    /// Ingress credentials. Validated by the external server, not here.
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub pass: Option<String>,

    /// Artifact wait budget in milliseconds (a fixed grace is added on top).
    #[serde(default)]
    pub wait_for_files: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Load the config for a run. With no explicit path, searches
    /// `config.production.json` then `config.json` under the root.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self, RunError> {
        let config = match explicit {
            Some(path) => {
                info!("Reading {}...", path.display());
                Self::load_from_file(path)?
            }
            None => {
                let production = root.join("config.production.json");
                info!("Reading config.production.json...");
                match Self::load_from_file(&production) {
                    Ok(config) => config,
                    Err(err) => {
                        debug!("{err}");
                        info!("Reading config.json...");
                        Self::load_from_file(&root.join("config.json"))?
                    }
                }
            }
        };

        if config.devices.is_empty() {
            return Err(RunError::new(
                ErrorCode::InvalidConfig,
                "No devices in the config JSON.",
            ));
        }

        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self, RunError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RunError::new(
                ErrorCode::InvalidConfig,
                format!("Failed to read the config JSON: {err}"),
            )
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            RunError::new(
                ErrorCode::InvalidConfig,
                format!("Failed to read the config JSON: {err}"),
            )
        })
    }

    /// The watched ingress root, with `{root}` expanded, or `None` when the
    /// ingress is absent or disabled.
    pub fn ftp_root(&self, root: &Path) -> Option<PathBuf> {
        let ftp = self.ftp.as_ref().filter(|ftp| ftp.enabled)?;
        let raw = ftp.root.as_deref().unwrap_or("{root}/ftp");
        Some(expand_root(raw, root))
    }

    /// Artifact wait budget in milliseconds, before the fixed grace.
    pub fn wait_for_files_ms(&self) -> u64 {
        self.ftp
            .as_ref()
            .and_then(|ftp| ftp.wait_for_files)
            .unwrap_or(10_000)
    }

    /// Destination for the persisted last image, with `{root}` expanded.
    pub fn write_last_image(&self, root: &Path) -> Option<PathBuf> {
        self.write_last_image
            .as_deref()
            .map(|raw| expand_root(raw, root))
    }
}

/// Expand the `{root}` placeholder in a configured path.
fn expand_root(raw: &str, root: &Path) -> PathBuf {
    PathBuf::from(raw.replace("{root}", &root.to_string_lossy()))
}

/// Clear leftover uploads from the watched root before a run starts.
///
/// Files are removed depth first; directory shells are kept so the external
/// server's layout survives. A missing root is a setup failure — the ingress
/// server owns its creation.
pub fn prepare_ftp_root(root: &Path) -> Result<(), RunError> {
    clear_directory(root).map_err(|err| {
        RunError::new(
            ErrorCode::FtpSetup,
            format!(
                "Failed to clear the FTP directory: {}: {err}",
                root.display()
            ),
        )
    })
}

fn clear_directory(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            clear_directory(&entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
