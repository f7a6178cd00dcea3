// Persistent vGPU identities for Exliar vGPU provisioning
//
// Each physical GPU owns a plain text store with one UUID per line. The
// store is written once when the device is first provisioned and read back
// on every later run so that vGPU UUIDs survive reboots.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use uuid::Uuid;

use crate::core::config::StorePolicy;
use crate::core::error::{ProvisionError, Result};
use crate::gpu::GpuDevice;

/// On-disk UUID list of one device
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

/// Identities resolved for one provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identities {
    pub uuids: Vec<Uuid>,
    /// UUIDs generated during this run
    pub created: usize,
    /// Whether an existing store was found
    pub reused: bool,
}

/// Exclusive advisory lock on a store, released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}

fn generate(count: usize) -> Vec<Uuid> {
    (0..count).map(|_| Uuid::new_v4()).collect()
}

impl IdentityStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store conventionally used for `device` under `store_dir`
    pub fn for_device(store_dir: &Path, device: &GpuDevice) -> Self {
        Self::new(store_dir.join(format!("vgpu-uuids-{}.txt", device.address)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn ensure_parent(&self) -> Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))
            }
            _ => Ok(()),
        }
    }

    /// Takes the store's lock without waiting
    pub fn lock(&self) -> Result<StoreLock> {
        self.ensure_parent()?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| ProvisionError::io(&lock_path, e))?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(StoreLock { file }),
            Err(Errno::EWOULDBLOCK) => Err(ProvisionError::StoreLocked { path: self.path.clone() }),
            Err(errno) => Err(ProvisionError::io(&lock_path, io::Error::from(errno))),
        }
    }

    /// Reads the stored UUIDs in order, `None` if the store does not exist
    pub fn load(&self) -> Result<Option<Vec<Uuid>>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProvisionError::io(&self.path, e)),
        };

        let mut uuids = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let value = line.trim();
            if value.is_empty() {
                continue;
            }
            let uuid = Uuid::parse_str(value).map_err(|_| ProvisionError::InvalidStore {
                path: self.path.clone(),
                line: index + 1,
                value: value.to_string(),
            })?;
            uuids.push(uuid);
        }
        Ok(Some(uuids))
    }

    /// Replaces the store with `uuids`, one per line
    pub fn save(&self, uuids: &[Uuid]) -> Result<()> {
        self.ensure_parent()?;

        let mut content = String::with_capacity(uuids.len() * 37);
        for uuid in uuids {
            content.push_str(&uuid.hyphenated().to_string());
            content.push('\n');
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, content).map_err(|e| ProvisionError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| ProvisionError::io(&self.path, e))
    }

    /// Returns the identities to bind for `device` with capacity `count`.
    ///
    /// A missing store is created with `count` fresh UUIDs. An existing store
    /// is reused in order; a length that differs from `count` is handled
    /// according to `policy`.
    pub fn resolve(&self, device: &GpuDevice, count: usize, policy: StorePolicy) -> Result<Identities> {
        let Some(mut uuids) = self.load()? else {
            let uuids = generate(count);
            self.save(&uuids)?;
            log::info!(
                "Created {} UUID(s) for {} in {}",
                uuids.len(),
                device,
                self.path.display()
            );
            return Ok(Identities {
                created: uuids.len(),
                uuids,
                reused: false,
            });
        };

        log::info!(
            "Reusing {} UUID(s) for {} from {}",
            uuids.len(),
            device,
            self.path.display()
        );

        let stored = uuids.len();
        if stored == count {
            return Ok(Identities {
                uuids,
                created: 0,
                reused: true,
            });
        }

        if policy == StorePolicy::Strict {
            return Err(ProvisionError::StoreMismatch {
                device: device.address.clone(),
                stored,
                expected: count,
            });
        }

        let mut created = 0;
        if stored < count {
            created = count - stored;
            uuids.extend(generate(created));
            self.save(&uuids)?;
            log::warn!(
                "Identity store for {} held {} UUID(s) but the profile allows {}; appended {}",
                device,
                stored,
                count,
                created
            );
        } else {
            log::warn!(
                "Identity store for {} holds {} UUID(s) but the profile allows {}; binding the first {}",
                device,
                stored,
                count,
                count
            );
        }

        Ok(Identities {
            uuids,
            created,
            reused: true,
        })
    }
}
