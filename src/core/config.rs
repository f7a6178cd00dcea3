// Configuration for Exliar vGPU provisioning
//
// The configuration is loaded once at startup from a TOML file, adjusted by
// command line overrides and then passed by reference into the provisioner.
// Nothing mutates it after validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{ProvisionError, Result};

/// Configuration file read when no explicit path is given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/exliar-vgpu/config.toml";

/// What to do when a persisted identity store does not hold exactly
/// `max_instance` UUIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorePolicy {
    /// Append fresh UUIDs up to the profile capacity; keep surplus entries
    #[default]
    Extend,
    /// Refuse to provision a device whose store length differs
    Strict,
}

/// Provisioning settings shared by every device in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Mediated device type to instantiate (e.g. "nvidia-558")
    pub profile: String,
    /// Directory holding the per-device identity stores
    pub store_dir: PathBuf,
    /// Root of the PCI device tree in sysfs
    pub sysfs_root: PathBuf,
    /// PCI domain prefixed to lspci's short addresses
    pub pci_domain: String,
    /// Path to NVIDIA's sriov-manage tool
    pub sriov_manage: PathBuf,
    /// Device listing command
    pub lspci: PathBuf,
    /// Vendor string matched against lspci output
    pub vendor: String,
    pub store_policy: StorePolicy,
    /// Hold an exclusive lock on each identity store while it is used
    pub lock_store: bool,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            store_dir: PathBuf::from("."),
            sysfs_root: PathBuf::from("/sys/bus/pci/devices"),
            pci_domain: "0000".to_string(),
            sriov_manage: PathBuf::from("/usr/lib/nvidia/sriov-manage"),
            lspci: PathBuf::from("lspci"),
            vendor: "NVIDIA".to_string(),
            store_policy: StorePolicy::Extend,
            lock_store: true,
        }
    }
}

/// Values given on the command line that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub profile: Option<String>,
    pub store_dir: Option<PathBuf>,
}

impl ProvisionConfig {
    /// Parses a configuration from TOML text
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|source| ProvisionError::ConfigParse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    log::debug!("No configuration at {}, using defaults", default.display());
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = fs::read_to_string(&path).map_err(|e| ProvisionError::io(&path, e))?;
        log::debug!("Loaded configuration from {}", path.display());
        Self::from_toml(&content, &path)
    }

    /// Applies command line overrides
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(profile) = overrides.profile {
            self.profile = profile;
        }
        if let Some(store_dir) = overrides.store_dir {
            self.store_dir = store_dir;
        }
        self
    }

    /// Checks that the configuration can drive a provisioning run
    pub fn validate(&self) -> Result<()> {
        let profile = self.profile.trim();
        if profile.is_empty() {
            return Err(ProvisionError::Config(
                "no vGPU profile configured (set `profile` or pass --profile)".to_string(),
            ));
        }
        if profile.contains('/') || profile != self.profile {
            return Err(ProvisionError::Config(format!(
                "profile name {:?} is not a valid mdev type name",
                self.profile
            )));
        }
        if self.pci_domain.is_empty() || !self.pci_domain.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProvisionError::Config(format!(
                "PCI domain {:?} must be hexadecimal",
                self.pci_domain
            )));
        }
        if self.vendor.is_empty() {
            return Err(ProvisionError::Config("vendor filter must not be empty".to_string()));
        }
        Ok(())
    }
}
