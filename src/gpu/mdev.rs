// Mediated device (mdev) interface of NVIDIA virtual functions
//
// Each VF of an SR-IOV enabled GPU exposes its vGPU profiles under
// `mdev_supported_types/<profile>/`. The `description` file advertises the
// profile's capacity and writing a UUID to `create` instantiates a vGPU.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::core::error::{ProvisionError, Result};
use crate::gpu::{natural_cmp, GpuDevice};

const SUPPORTED_TYPES: &str = "mdev_supported_types";
const VF_PREFIX: &str = "virtfn";

/// A virtual function link under a physical function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFunction {
    /// Link name, e.g. "virtfn3"
    pub name: String,
    pub path: PathBuf,
}

impl VirtualFunction {
    /// Directory of `profile` under this VF
    pub fn profile_dir(&self, profile: &str) -> PathBuf {
        self.path.join(SUPPORTED_TYPES).join(profile)
    }

    /// Control node that instantiates a vGPU of `profile`
    pub fn create_node(&self, profile: &str) -> PathBuf {
        self.profile_dir(profile).join("create")
    }
}

/// Outcome of binding a device's identities to its VFs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOutcome {
    /// Number of create-node writes that succeeded
    pub bound: usize,
    /// Identities left unbound because the device ran out of VFs
    pub unbound: usize,
}

fn max_instance_regex() -> &'static Regex {
    static MAX_INSTANCE: OnceLock<Regex> = OnceLock::new();
    MAX_INSTANCE.get_or_init(|| {
        Regex::new(r"(?:^|,)\s*max_instance\s*=\s*([^,]*?)\s*(?:,|$)").expect("static regex is valid")
    })
}

/// Extracts `max_instance` from a profile description such as
/// `num_heads=4, frl_config=60, framebuffer=2048M, max_instance=24`.
/// Returns `None` when the key is absent, not a number or zero.
pub fn parse_max_instance(description: &str) -> Option<usize> {
    let caps = max_instance_regex().captures(description.trim())?;
    caps[1].parse::<usize>().ok().filter(|n| *n > 0)
}

/// Path of the profile description advertised by VF 0 of `device`
pub fn description_path(device: &GpuDevice, sysfs_root: &Path, profile: &str) -> PathBuf {
    device
        .sysfs_path(sysfs_root)
        .join(format!("{}0", VF_PREFIX))
        .join(SUPPORTED_TYPES)
        .join(profile)
        .join("description")
}

/// Resolves how many vGPU instances of `profile` the device supports
pub fn resolve_max_instances(device: &GpuDevice, sysfs_root: &Path, profile: &str) -> Result<usize> {
    let path = description_path(device, sysfs_root, profile);
    let description = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ProvisionError::ProfileNotFound {
                device: device.address.clone(),
                profile: profile.to_string(),
                path,
            })
        }
        Err(e) => return Err(ProvisionError::io(&path, e)),
    };

    parse_max_instance(&description).ok_or_else(|| ProvisionError::MaxInstanceMissing {
        device: device.address.clone(),
        profile: profile.to_string(),
        description: description.trim().to_string(),
    })
}

/// Lists the VF links of `device` in numeric order
pub fn list_virtual_functions(device: &GpuDevice, sysfs_root: &Path) -> Result<Vec<VirtualFunction>> {
    let device_path = device.sysfs_path(sysfs_root);
    let entries = fs::read_dir(&device_path).map_err(|e| ProvisionError::io(&device_path, e))?;

    let mut vfs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ProvisionError::io(&device_path, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_vf = name
            .strip_prefix(VF_PREFIX)
            .map_or(false, |n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
        if is_vf {
            vfs.push(VirtualFunction {
                path: entry.path(),
                name,
            });
        }
    }

    vfs.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    Ok(vfs)
}

/// Writes `uuid` into a VF's create node for `profile`
fn write_create_node(device: &GpuDevice, vf: &VirtualFunction, profile: &str, uuid: &Uuid) -> Result<()> {
    let path = vf.create_node(profile);
    let uuid_str = uuid.to_string();
    let result = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&path)
        .and_then(|mut node| node.write_all(uuid_str.as_bytes()));

    result.map_err(|source| ProvisionError::BindFailed {
        device: device.address.clone(),
        vf: vf.name.clone(),
        uuid: uuid_str,
        path,
        source,
    })
}

/// Binds identity `i` to VF `i` for every `i < count`.
///
/// Stops early when the device has fewer than `count` VFs; that shortfall is
/// reported in the outcome. A failed write aborts with `BindFailed`.
pub fn bind_identities(
    device: &GpuDevice,
    vfs: &[VirtualFunction],
    uuids: &[Uuid],
    count: usize,
    profile: &str,
) -> Result<BindOutcome> {
    if uuids.len() < count {
        return Err(ProvisionError::StoreMismatch {
            device: device.address.clone(),
            stored: uuids.len(),
            expected: count,
        });
    }

    let mut bound = 0;
    for (index, uuid) in uuids.iter().take(count).enumerate() {
        let Some(vf) = vfs.get(index) else {
            break;
        };
        write_create_node(device, vf, profile, uuid)?;
        log::debug!("Created vGPU {} on {} ({})", uuid, vf.name, device);
        bound += 1;
    }

    let unbound = count - bound;
    if unbound > 0 {
        log::warn!(
            "{} has only {} VF(s); {} of {} UUIDs were not bound",
            device,
            vfs.len(),
            unbound,
            count
        );
    }

    Ok(BindOutcome { bound, unbound })
}
