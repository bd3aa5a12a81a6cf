//! Local hook commands and SSH reachability.
//!
//! Hooks run through `sh -c` with an explicit working directory; the
//! process working directory is never changed.

use crate::application::{HookCommand, SshLogin};
use crate::error::Result;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Placeholder replaced with the target instance addresses.
pub const DNS_NAME_PLACEHOLDER: &str = "{dns_name}";

/// Runs shell commands.
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `working_directory` and return its exit code.
    ///
    /// A command killed by a signal reports `-1`.
    fn run(&self, command: &str, working_directory: &Path) -> Result<i32>;
}

/// Runs commands with `sh -c`, inheriting stdio so output shows in real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, working_directory: &Path) -> Result<i32> {
        log::info!("Running `{command}` in {}", working_directory.display());
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_directory)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Tells whether an instance accepts remote logins yet.
pub trait ReachabilityProbe: Send + Sync {
    /// Whether `address` accepts a login as `login`.
    fn is_reachable(&self, address: &str, login: &SshLogin) -> bool;
}

/// Probes with a non-interactive `ssh ... true`.
#[derive(Debug, Clone)]
pub struct SshProbe {
    connect_timeout: Duration,
}

impl Default for SshProbe {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl SshProbe {
    fn args(&self, address: &str, login: &SshLogin) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(key) = &login.key_filename {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{address}", login.username));
        args.push("true".to_string());
        args
    }
}

impl ReachabilityProbe for SshProbe {
    fn is_reachable(&self, address: &str, login: &SshLogin) -> bool {
        Command::new("ssh")
            .args(self.args(address, login))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl HookCommand {
    /// Command line with `{dns_name}` filled in and `extra_args` appended.
    pub fn render(&self, addresses: &[String], extra_args: &[String]) -> String {
        let mut command = self
            .command
            .replace(DNS_NAME_PLACEHOLDER, &addresses.join(","));
        for arg in extra_args {
            command.push(' ');
            command.push_str(&shell_quote(arg));
        }
        command
    }
}

/// Quote `arg` for `sh` unless it is made of safe characters only.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn hook(command: &str) -> HookCommand {
        HookCommand {
            command: command.to_string(),
            working_directory: PathBuf::from("/srv/app"),
        }
    }

    #[test]
    fn test_render_fills_all_addresses() {
        let rendered = hook("fab -H {dns_name} deploy").render(
            &["ec2-1.example.com".to_string(), "ec2-2.example.com".to_string()],
            &[],
        );
        assert_eq!(rendered, "fab -H ec2-1.example.com,ec2-2.example.com deploy");
    }

    #[test]
    fn test_render_quotes_extra_args() {
        let rendered = hook("./provision.sh {dns_name}").render(
            &["10.0.0.5".to_string()],
            &["--branch=main".to_string(), "it's here".to_string()],
        );
        assert_eq!(rendered, r"./provision.sh 10.0.0.5 --branch=main 'it'\''s here'");
    }

    #[test]
    fn test_ssh_probe_arguments() {
        let login = SshLogin {
            username: "ubuntu".to_string(),
            key_filename: Some(PathBuf::from("/keys/deploy.pem")),
        };
        let args = SshProbe::default().args("ec2-1.example.com", &login);
        assert!(args.contains(&"ConnectTimeout=2".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(
            &args[args.len() - 4..],
            &["-i", "/keys/deploy.pem", "ubuntu@ec2-1.example.com", "true"]
        );
    }

    #[test]
    fn test_shell_runner_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner;
        assert_eq!(runner.run("true", dir.path()).unwrap(), 0);
        assert_eq!(runner.run("exit 3", dir.path()).unwrap(), 3);
        assert_eq!(runner.run("test -d .", dir.path()).unwrap(), 0);
    }
}
