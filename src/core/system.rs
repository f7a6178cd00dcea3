// Host checks for Exliar vGPU provisioning

use nix::unistd::Uid;

use crate::core::error::{ProvisionError, Result};

/// Returns true if the process runs with an effective uid of 0
pub fn is_root() -> bool {
    Uid::effective().is_root()
}

/// Fails with `NotPrivileged` unless running as root
pub fn require_root() -> Result<()> {
    let uid = Uid::effective();
    if uid.is_root() {
        Ok(())
    } else {
        Err(ProvisionError::NotPrivileged { uid: uid.as_raw() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_root_matches_effective_uid() {
        assert_eq!(require_root().is_ok(), is_root());
    }
}
