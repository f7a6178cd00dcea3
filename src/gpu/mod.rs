// GPU management module for Exliar vGPU provisioning
//
// This module handles NVIDIA device discovery, the SR-IOV state of each
// physical function, and the mediated device (mdev) interface exposed by
// its virtual functions

pub mod detection;
pub mod mdev;
pub mod sriov;

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// A physical NVIDIA PCI function discovered on the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GpuDevice {
    /// Short Bus:Device.Function address as printed by lspci (e.g. "65:00.0")
    pub bdf: String,
    /// Address including the PCI domain (e.g. "0000:65:00.0")
    pub address: String,
}

impl GpuDevice {
    pub fn new(bdf: &str, domain: &str) -> Self {
        Self {
            bdf: bdf.to_string(),
            address: format!("{}:{}", domain, bdf),
        }
    }

    /// Path of the device in sysfs
    pub fn sysfs_path(&self, sysfs_root: &Path) -> PathBuf {
        sysfs_root.join(&self.address)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Splits a name into its non-numeric stem and trailing integer, if any
fn split_numeric_suffix(name: &str) -> (&str, Option<u64>) {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let suffix = &name[stem.len()..];
    (stem, suffix.parse().ok())
}

/// Orders names by stem and then by the numeric value of their trailing
/// digits, so `virtfn9` sorts before `virtfn10`
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (stem_a, num_a) = split_numeric_suffix(a);
    let (stem_b, num_b) = split_numeric_suffix(b);
    stem_a
        .cmp(stem_b)
        .then_with(|| num_a.cmp(&num_b))
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_order_compares_suffix_numerically() {
        let mut names = vec!["virtfn10", "virtfn2", "virtfn1", "virtfn0", "virtfn9", "virtfn11"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, ["virtfn0", "virtfn1", "virtfn2", "virtfn9", "virtfn10", "virtfn11"]);
    }

    #[test]
    fn natural_order_falls_back_to_text() {
        assert_eq!(natural_cmp("virtfn", "virtfn0"), Ordering::Less);
        assert_eq!(natural_cmp("virtfn01", "virtfn1"), Ordering::Less);
        assert_eq!(natural_cmp("a5", "b1"), Ordering::Less);
    }

    #[test]
    fn device_paths_use_domain() {
        let dev = GpuDevice::new("65:00.0", "0000");
        assert_eq!(dev.address, "0000:65:00.0");
        assert_eq!(
            dev.sysfs_path(Path::new("/sys/bus/pci/devices")),
            PathBuf::from("/sys/bus/pci/devices/0000:65:00.0")
        );
        assert_eq!(dev.to_string(), "0000:65:00.0");
    }
}
