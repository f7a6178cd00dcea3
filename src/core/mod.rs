pub mod config;
pub mod error;
pub mod identity;
pub mod provisioner;
pub mod system;
