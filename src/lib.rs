// Exliar vGPU Provisioning
//
// Enables SR-IOV on NVIDIA GPUs and creates mediated vGPU devices with UUIDs
// that stay the same across reboots

// Configuration, identity store and provisioning flow
pub mod core;

// Device discovery, SR-IOV and mdev handling
pub mod gpu;

// Utility functions
pub mod utils;

pub use crate::core::config::ProvisionConfig;
pub use crate::core::error::{ProvisionError, Result};
pub use crate::core::provisioner::{DeviceReport, DeviceStatus, Provisioner};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
