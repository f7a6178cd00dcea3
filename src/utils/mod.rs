// Utility functions for Exliar vGPU provisioning

use std::path::Path;
use std::process::Command;

use crate::core::error::{ProvisionError, Result};

/// Logging setup on top of the `log` facade
pub mod logging {
    use std::io::Write;

    use log::LevelFilter;

    /// Maps the number of `-v` flags to a default level
    pub fn level_for(verbosity: u8) -> LevelFilter {
        match verbosity {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Installs the global logger. `RUST_LOG` wins over `verbosity`.
    pub fn init(verbosity: u8) -> Result<(), log::SetLoggerError> {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(level_for(verbosity));
        if let Ok(spec) = std::env::var("RUST_LOG") {
            builder.parse_filters(&spec);
        }
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        });
        builder.try_init()
    }
}

/// Captured result of an external command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external programs on behalf of the provisioner
pub trait CommandRunner {
    /// Runs `program` with `args` and captures its exit status and output
    fn run(&self, program: &Path, args: &[&str]) -> Result<CommandOutput>;

    /// Like `run`, but a non-zero exit becomes `CommandFailed`
    fn run_checked(&self, program: &Path, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(program, args)?;
        if output.success() {
            Ok(output)
        } else {
            Err(ProvisionError::CommandFailed {
                program: program.display().to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands on the host with `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &Path, args: &[&str]) -> Result<CommandOutput> {
        log::debug!("Executing: {} {}", program.display(), args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| ProvisionError::CommandSpawn {
                program: program.display().to_string(),
                source,
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_status() {
        let out = SystemCommandRunner
            .run(Path::new("sh"), &["-c", "echo hello; exit 3"])
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert!(!out.success());
    }

    #[test]
    fn run_checked_reports_failure() {
        let err = SystemCommandRunner
            .run_checked(Path::new("sh"), &["-c", "echo oops >&2; exit 1"])
            .unwrap_err();
        match err {
            ProvisionError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = SystemCommandRunner
            .run(Path::new("/nonexistent/exliar-test-binary"), &[])
            .unwrap_err();
        assert!(matches!(err, ProvisionError::CommandSpawn { .. }));
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(logging::level_for(0), log::LevelFilter::Info);
        assert_eq!(logging::level_for(1), log::LevelFilter::Debug);
        assert_eq!(logging::level_for(5), log::LevelFilter::Trace);
    }
}
