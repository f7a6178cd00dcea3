// SR-IOV handling for NVIDIA physical functions
//
// A device whose SR-IOV is already on is never touched. Otherwise SR-IOV is
// switched on with NVIDIA's sriov-manage tool.

use std::fs;
use std::io;
use std::path::Path;

use crate::core::config::ProvisionConfig;
use crate::core::error::{ProvisionError, Result};
use crate::gpu::GpuDevice;
use crate::utils::CommandRunner;

/// sysfs attribute holding the number of enabled virtual functions
pub const SRIOV_NUMVFS: &str = "sriov_numvfs";

/// Reads the number of VFs currently enabled on `device`.
/// A device without the attribute reports 0.
pub fn enabled_vfs(device: &GpuDevice, sysfs_root: &Path) -> Result<u32> {
    let path = device.sysfs_path(sysfs_root).join(SRIOV_NUMVFS);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(ProvisionError::io(&path, e)),
    };

    raw.trim().parse().map_err(|_| {
        ProvisionError::io(
            &path,
            io::Error::new(io::ErrorKind::InvalidData, format!("unexpected value {:?}", raw.trim())),
        )
    })
}

/// Fails with `SriovAlreadyEnabled` if SR-IOV is on for `device`
pub fn ensure_disabled(device: &GpuDevice, sysfs_root: &Path) -> Result<()> {
    let num_vfs = enabled_vfs(device, sysfs_root)?;
    if num_vfs > 0 {
        return Err(ProvisionError::SriovAlreadyEnabled {
            device: device.address.clone(),
            num_vfs,
        });
    }
    Ok(())
}

/// Switches `device` into SR-IOV mode with `sriov-manage -e`
pub fn enable(device: &GpuDevice, config: &ProvisionConfig, runner: &dyn CommandRunner) -> Result<()> {
    log::info!("Enabling SR-IOV on {}", device);
    runner
        .run_checked(&config.sriov_manage, &["-e", device.address.as_str()])
        .map_err(|e| ProvisionError::SriovEnableFailed {
            device: device.address.clone(),
            source: Box::new(e),
        })?;
    Ok(())
}
