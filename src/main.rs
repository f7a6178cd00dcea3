use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use exliar_vgpu::core::config::{ConfigOverrides, ProvisionConfig};
use exliar_vgpu::core::system;
use exliar_vgpu::utils::{logging, SystemCommandRunner};
use exliar_vgpu::{DeviceStatus, Provisioner, Result};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: /etc/exliar-vgpu/config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// mdev profile to instantiate, e.g. nvidia-558
    #[arg(short, long)]
    profile: Option<String>,

    /// Directory holding the per-device UUID stores
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Enable SR-IOV and create the vGPUs of every NVIDIA device (default)
    Provision,
    /// Show SR-IOV and vGPU identity state without changing anything
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = ProvisionConfig::load(cli.config.as_deref())?.with_overrides(ConfigOverrides {
        profile: cli.profile,
        store_dir: cli.store_dir,
    });
    let runner = SystemCommandRunner;
    let provisioner = Provisioner::new(&config, &runner);

    match cli.command.unwrap_or(Command::Provision) {
        Command::Provision => {
            system::require_root()?;
            config.validate()?;
            log::info!("Exliar vGPU {} provisioning profile {}", exliar_vgpu::VERSION, config.profile);

            let reports = provisioner.run()?;
            let partial = reports.iter().filter(|r| r.is_partial()).count();
            let bound: usize = reports.iter().map(|r| r.bound).sum();
            if partial > 0 {
                log::warn!(
                    "Provisioned {} vGPU(s) on {} device(s); {} device(s) ran out of VFs",
                    bound,
                    reports.len(),
                    partial
                );
            } else {
                log::info!("Provisioned {} vGPU(s) on {} device(s)", bound, reports.len());
            }
            Ok(())
        }
        Command::Status { json } => {
            let status = provisioner.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&config, &status);
            }
            Ok(())
        }
    }
}

fn print_status(config: &ProvisionConfig, status: &[DeviceStatus]) {
    if status.is_empty() {
        println!("No {} devices found", config.vendor);
        return;
    }

    for (i, dev) in status.iter().enumerate() {
        println!("GPU {}: {}", i + 1, dev.device);
        println!("  SR-IOV VFs enabled: {}", dev.enabled_vfs);
        println!("  Virtual functions present: {}", dev.virtual_functions);
        match dev.max_instances {
            Some(n) => println!("  Profile {} max instances: {}", config.profile, n),
            None => println!("  Profile {} max instances: unavailable", config.profile),
        }
        match &dev.uuids {
            Some(uuids) => {
                println!("  Identity store: {} ({} UUIDs)", dev.store.display(), uuids.len());
                for (index, uuid) in uuids.iter().enumerate() {
                    println!("    virtfn{}: {}", index, uuid);
                }
            }
            None => println!("  Identity store: {} (not created)", dev.store.display()),
        }
    }
}
