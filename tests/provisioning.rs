// End-to-end provisioning against a fake sysfs tree

use std::cell::RefCell;
use std::fs::{self, create_dir_all, write};
use std::path::{Path, PathBuf};

use exliar_vgpu::core::config::StorePolicy;
use exliar_vgpu::utils::{CommandOutput, CommandRunner};
use exliar_vgpu::{ProvisionConfig, ProvisionError, Provisioner, Result};
use tempfile::{tempdir, TempDir};

const PROFILE: &str = "nvidia-558";
const LSPCI: &str = "\
00:00.0 Host bridge: Intel Corporation Ice Lake Memory Map/VT-d (rev 04)
65:00.0 3D controller: NVIDIA Corporation GA102GL [A40] (rev a1)
";

#[derive(Default)]
struct RecordingRunner {
    calls: RefCell<Vec<(PathBuf, Vec<String>)>>,
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &Path, args: &[&str]) -> Result<CommandOutput> {
        self.calls.borrow_mut().push((
            program.to_path_buf(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
        let stdout = if program.ends_with("lspci") {
            LSPCI.to_string()
        } else {
            String::new()
        };
        Ok(CommandOutput {
            code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

struct Host {
    _temp: TempDir,
    config: ProvisionConfig,
}

impl Host {
    /// One A40 at 65:00.0 with `vfs` virtual functions
    fn new(vfs: usize, description: &str) -> Self {
        let temp = tempdir().unwrap();
        let config = ProvisionConfig {
            profile: PROFILE.to_string(),
            store_dir: temp.path().join("var/lib/exliar-vgpu"),
            sysfs_root: temp.path().join("sys/bus/pci/devices"),
            ..Default::default()
        };
        let host = Self { _temp: temp, config };

        let pf = host.pf();
        create_dir_all(&pf).unwrap();
        write(pf.join("sriov_numvfs"), "0\n").unwrap();
        for i in 0..vfs {
            let dir = pf.join(format!("virtfn{i}/mdev_supported_types/{PROFILE}"));
            create_dir_all(&dir).unwrap();
            write(dir.join("description"), description).unwrap();
            write(dir.join("create"), "").unwrap();
        }
        host
    }

    fn pf(&self) -> PathBuf {
        self.config.sysfs_root.join("0000:65:00.0")
    }

    fn created(&self, vf: usize) -> String {
        fs::read_to_string(
            self.pf()
                .join(format!("virtfn{vf}/mdev_supported_types/{PROFILE}/create")),
        )
        .unwrap()
    }

    fn store(&self) -> PathBuf {
        self.config.store_dir.join("vgpu-uuids-0000:65:00.0.txt")
    }

    fn stored_lines(&self) -> Vec<String> {
        fs::read_to_string(self.store())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

const A40_DESCRIPTION: &str =
    "num_heads=4, frl_config=60, framebuffer=2048M, max_resolution=5120x2880, max_instance=16\n";

#[test]
fn first_run_creates_and_binds_sixteen_vgpus() {
    let host = Host::new(16, A40_DESCRIPTION);
    let runner = RecordingRunner::default();

    let reports = Provisioner::new(&host.config, &runner).run().unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.max_instances, 16);
    assert_eq!(report.created, 16);
    assert!(!report.reused);
    assert_eq!(report.bound, 16);
    assert_eq!(report.unbound, 0);

    let lines = host.stored_lines();
    assert_eq!(lines.len(), 16);
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(&host.created(i), line, "virtfn{i} got the wrong UUID");
    }

    let calls = runner.calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].0, PathBuf::from("/usr/lib/nvidia/sriov-manage"));
    assert_eq!(calls[1].1, ["-e", "0000:65:00.0"]);
}

#[test]
fn rerun_reuses_the_same_identities() {
    let host = Host::new(16, A40_DESCRIPTION);
    let runner = RecordingRunner::default();
    Provisioner::new(&host.config, &runner).run().unwrap();
    let first = host.stored_lines();

    // A reboot leaves the store but clears the create nodes
    for i in 0..16 {
        write(
            host.pf().join(format!("virtfn{i}/mdev_supported_types/{PROFILE}/create")),
            "",
        )
        .unwrap();
    }

    let reports = Provisioner::new(&host.config, &runner).run().unwrap();
    assert_eq!(reports[0].created, 0);
    assert!(reports[0].reused);
    assert_eq!(reports[0].bound, 16);
    assert_eq!(host.stored_lines(), first);
    for (i, line) in first.iter().enumerate() {
        assert_eq!(&host.created(i), line);
    }
}

#[test]
fn fewer_vfs_than_instances_is_partial_success() {
    let host = Host::new(5, A40_DESCRIPTION);
    let runner = RecordingRunner::default();

    let report = &Provisioner::new(&host.config, &runner).run().unwrap()[0];
    assert_eq!(report.created, 16);
    assert_eq!(report.bound, 5);
    assert_eq!(report.unbound, 11);
    assert_eq!(host.stored_lines().len(), 16);
}

#[test]
fn enabled_sriov_stops_the_run_untouched() {
    let host = Host::new(4, A40_DESCRIPTION);
    write(host.pf().join("sriov_numvfs"), "4\n").unwrap();
    let runner = RecordingRunner::default();

    let err = Provisioner::new(&host.config, &runner).run().unwrap_err();
    assert!(err.to_string().contains("0000:65:00.0"));
    assert!(matches!(err, ProvisionError::SriovAlreadyEnabled { .. }));
    assert_eq!(runner.calls.borrow().len(), 1);
    assert!(!host.store().exists());
    assert_eq!(host.created(0), "");
}

#[test]
fn missing_max_instance_is_a_configuration_error() {
    let host = Host::new(4, "num_heads=4, framebuffer=2048M\n");
    let runner = RecordingRunner::default();

    match Provisioner::new(&host.config, &runner).run().unwrap_err() {
        ProvisionError::MaxInstanceMissing { device, profile, .. } => {
            assert_eq!(device, "0000:65:00.0");
            assert_eq!(profile, PROFILE);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!host.store().exists());
}

#[test]
fn strict_policy_refuses_a_resized_profile() {
    let mut host = Host::new(16, A40_DESCRIPTION);
    host.config.store_policy = StorePolicy::Strict;
    let runner = RecordingRunner::default();
    Provisioner::new(&host.config, &runner).run().unwrap();

    let half = A40_DESCRIPTION.replace("max_instance=16", "max_instance=8");
    write(
        host.pf().join(format!("virtfn0/mdev_supported_types/{PROFILE}/description")),
        half,
    )
    .unwrap();

    let err = Provisioner::new(&host.config, &runner).run().unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::StoreMismatch { stored: 16, expected: 8, .. }
    ));
}
