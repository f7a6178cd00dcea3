// Error types for Exliar vGPU provisioning
//
// Every failure the provisioner can hit is one variant of ProvisionError.
// All of them abort the run; a VF shortfall is not an error and is only
// logged as a warning by the binder.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("vGPU provisioning must run as root (effective uid {uid})")]
    NotPrivileged { uid: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to execute {program}: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with status {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error(
        "SR-IOV is already enabled on {device} ({num_vfs} VFs); \
         disable SR-IOV on this device before provisioning vGPUs"
    )]
    SriovAlreadyEnabled { device: String, num_vfs: u32 },

    #[error("failed to enable SR-IOV on {device}: {source}")]
    SriovEnableFailed {
        device: String,
        #[source]
        source: Box<ProvisionError>,
    },

    #[error("profile {profile} is not available on {device} (no {path})")]
    ProfileNotFound {
        device: String,
        profile: String,
        path: PathBuf,
    },

    #[error("profile {profile} on {device} has no usable max_instance in {description:?}")]
    MaxInstanceMissing {
        device: String,
        profile: String,
        description: String,
    },

    #[error("identity store {path} line {line}: {value:?} is not a UUID")]
    InvalidStore {
        path: PathBuf,
        line: usize,
        value: String,
    },

    #[error("identity store for {device} holds {stored} UUIDs but the profile allows {expected}")]
    StoreMismatch {
        device: String,
        stored: usize,
        expected: usize,
    },

    #[error("identity store {path} is locked by another provisioner")]
    StoreLocked { path: PathBuf },

    #[error("failed to bind {uuid} to {vf} of {device} via {path}: {source}")]
    BindFailed {
        device: String,
        vf: String,
        uuid: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    /// Wraps an io::Error with the path it relates to
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ProvisionError::Io {
            path: path.into(),
            source,
        }
    }
}
