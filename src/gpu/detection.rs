// GPU detection module for Exliar vGPU provisioning
//
// This module finds the NVIDIA functions on the PCI bus by parsing the
// output of lspci

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::config::ProvisionConfig;
use crate::core::error::Result;
use crate::gpu::GpuDevice;
use crate::utils::CommandRunner;

/// Leading `[domain:]bus:device.function` token of an lspci line
fn slot_regex() -> &'static Regex {
    static SLOT: OnceLock<Regex> = OnceLock::new();
    SLOT.get_or_init(|| {
        Regex::new(r"^(?:([0-9a-fA-F]{4,}):)?([0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7])\s")
            .expect("static regex is valid")
    })
}

/// Extracts the distinct devices of lines mentioning `vendor`, in the order
/// lspci reported them. Lines without a domain are placed in `default_domain`.
pub fn parse_lspci(output: &str, vendor: &str, default_domain: &str) -> Vec<GpuDevice> {
    let mut seen = HashSet::new();
    output
        .lines()
        .filter(|line| line.contains(vendor))
        .filter_map(|line| slot_regex().captures(line))
        .map(|caps| {
            let domain = caps
                .get(1)
                .map_or(default_domain.to_string(), |d| d.as_str().to_ascii_lowercase());
            GpuDevice::new(&caps[2].to_ascii_lowercase(), &domain)
        })
        .filter(|dev| seen.insert(dev.address.clone()))
        .collect()
}

/// Detects the configured vendor's devices on the PCI bus
pub fn detect_gpus(config: &ProvisionConfig, runner: &dyn CommandRunner) -> Result<Vec<GpuDevice>> {
    let output = runner.run_checked(&config.lspci, &[])?;
    let devices = parse_lspci(&output.stdout, &config.vendor, &config.pci_domain);

    log::debug!("Detected {} {} device(s)", devices.len(), config.vendor);
    Ok(devices)
}
