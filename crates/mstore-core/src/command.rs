//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;

use mstore_common::{LifecycleError, Result};
use tokio::process::Command;
use tracing::info;

/// An external program invocation whose combined output is captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().display().to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Run to completion. A non-zero exit becomes [`LifecycleError::Command`]
    /// carrying stdout and stderr.
    pub async fn run(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| LifecycleError::System {
                context: format!("spawning `{self}`"),
                source: err,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_owned();
        info!(command = %self, status = %output.status, output = %combined, "external command finished");

        if !output.status.success() {
            return Err(LifecycleError::Command {
                command: self.to_string(),
                output: combined,
            });
        }
        Ok(combined)
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn renders_command_line() {
        let cmd = ExternalCommand::new("/bin/systemctl")
            .arg("--no-block")
            .args(["stop", "etcd.service"]);
        assert_eq!(cmd.to_string(), "/bin/systemctl --no-block stop etcd.service");
    }

    #[tokio::test]
    async fn captures_output_of_failed_command() {
        let err = ExternalCommand::new("/bin/sh")
            .args(["-c", "echo unit not loaded >&2; exit 5"])
            .run()
            .await
            .unwrap_err();
        assert_matches!(err, LifecycleError::Command { ref output, .. } if output == "unit not loaded");
    }

    #[tokio::test]
    async fn returns_stdout_on_success() {
        let out = ExternalCommand::new("/bin/sh")
            .args(["-c", "echo active"])
            .run()
            .await
            .unwrap();
        assert_eq!(out, "active");
    }

    #[tokio::test]
    async fn missing_program_is_a_system_error() {
        let err = ExternalCommand::new("/nonexistent/systemctl")
            .run()
            .await
            .unwrap_err();
        assert_matches!(err, LifecycleError::System { .. });
    }
}
