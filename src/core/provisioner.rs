// vGPU provisioning for Exliar
//
// Walks every detected NVIDIA device in enumeration order: checks and enables
// SR-IOV, resolves the profile capacity, loads or creates the device's
// identity store and binds each identity to a virtual function.

use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use crate::core::config::ProvisionConfig;
use crate::core::error::Result;
use crate::core::identity::IdentityStore;
use crate::gpu::detection::detect_gpus;
use crate::gpu::{mdev, sriov, GpuDevice};
use crate::utils::CommandRunner;

/// Result of provisioning one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceReport {
    pub device: GpuDevice,
    pub profile: String,
    pub max_instances: usize,
    pub store: PathBuf,
    /// UUIDs generated during this run
    pub created: usize,
    /// Whether an existing identity store was reused
    pub reused: bool,
    pub bound: usize,
    /// Identities left unbound for lack of VFs
    pub unbound: usize,
}

impl DeviceReport {
    pub fn is_partial(&self) -> bool {
        self.unbound > 0
    }
}

/// Read-only view of a device's vGPU state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub device: GpuDevice,
    pub enabled_vfs: u32,
    pub virtual_functions: usize,
    /// `None` when the profile cannot be read (e.g. SR-IOV is off)
    pub max_instances: Option<usize>,
    pub store: PathBuf,
    /// `None` when the device has no identity store yet
    pub uuids: Option<Vec<Uuid>>,
}

/// Provisions vGPUs according to a fixed configuration
pub struct Provisioner<'a> {
    config: &'a ProvisionConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a ProvisionConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    fn store_for(&self, device: &GpuDevice) -> IdentityStore {
        IdentityStore::for_device(&self.config.store_dir, device)
    }

    /// Provisions every detected device, stopping at the first fatal error
    pub fn run(&self) -> Result<Vec<DeviceReport>> {
        let devices = detect_gpus(self.config, self.runner)?;
        if devices.is_empty() {
            log::info!("No {} devices found, nothing to provision", self.config.vendor);
            return Ok(Vec::new());
        }

        let mut reports = Vec::with_capacity(devices.len());
        for device in &devices {
            reports.push(self.provision_device(device)?);
        }
        Ok(reports)
    }

    /// Provisions a single physical GPU
    pub fn provision_device(&self, device: &GpuDevice) -> Result<DeviceReport> {
        let sysfs_root = &self.config.sysfs_root;
        let profile = &self.config.profile;
        log::info!("Provisioning {} with profile {}", device, profile);

        sriov::ensure_disabled(device, sysfs_root)?;
        sriov::enable(device, self.config, self.runner)?;

        let max_instances = mdev::resolve_max_instances(device, sysfs_root, profile)?;
        log::info!("Profile {} allows {} instance(s) on {}", profile, max_instances, device);

        let store = self.store_for(device);
        let _lock = if self.config.lock_store {
            Some(store.lock()?)
        } else {
            None
        };

        let identities = store.resolve(device, max_instances, self.config.store_policy)?;
        let vfs = mdev::list_virtual_functions(device, sysfs_root)?;
        let outcome = mdev::bind_identities(device, &vfs, &identities.uuids, max_instances, profile)?;

        log::info!(
            "Bound {} of {} vGPU(s) on {}",
            outcome.bound,
            max_instances,
            device
        );

        Ok(DeviceReport {
            device: device.clone(),
            profile: profile.clone(),
            max_instances,
            store: store.path().to_path_buf(),
            created: identities.created,
            reused: identities.reused,
            bound: outcome.bound,
            unbound: outcome.unbound,
        })
    }

    /// Collects the vGPU state of every detected device without changing it
    pub fn status(&self) -> Result<Vec<DeviceStatus>> {
        let sysfs_root = &self.config.sysfs_root;
        detect_gpus(self.config, self.runner)?
            .into_iter()
            .map(|device| -> Result<DeviceStatus> {
                let store = self.store_for(&device);
                let virtual_functions = mdev::list_virtual_functions(&device, sysfs_root)
                    .map(|vfs| vfs.len())
                    .unwrap_or(0);
                let max_instances =
                    mdev::resolve_max_instances(&device, sysfs_root, &self.config.profile).ok();
                Ok(DeviceStatus {
                    enabled_vfs: sriov::enabled_vfs(&device, sysfs_root)?,
                    virtual_functions,
                    max_instances,
                    store: store.path().to_path_buf(),
                    uuids: store.load()?,
                    device,
                })
            })
            .collect()
    }
}
