//! Remote command execution through the system `ssh` client

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use crate::config::{ControllerConfig, SshOptions};
use crate::error::{AdminError, Result};

/// Remote shell that reads its script from stdin
const REMOTE_SHELL: &str = "sh -s";

/// Connection parameters shared by every host in the deployment.
/// Carries no host of its own; bind one with [`ConnectParams::target`].
#[derive(Debug, Clone)]
pub struct ConnectParams {
    user: String,
    port: Option<u16>,
    identity_file: Option<PathBuf>,
    proxy: Option<ProxyJump>,
    timeout: Duration,
    strict_host_key_checking: bool,
}

#[derive(Debug, Clone)]
struct ProxyJump {
    host: String,
    user: String,
    identity_file: Option<PathBuf>,
}

impl ConnectParams {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            port: None,
            identity_file: None,
            proxy: None,
            timeout: Duration::from_secs(30),
            strict_host_key_checking: false,
        }
    }

    /// Take everything from the controller config except its hostname
    pub fn from_config(controller: &ControllerConfig, options: &SshOptions) -> Self {
        let mut params = Self::new(controller.username.clone());
        params.port = controller.port;
        params.identity_file = controller.keypath.clone();
        params.proxy = controller.proxy_hostname.as_ref().map(|host| ProxyJump {
            host: host.clone(),
            user: controller.proxy_username.clone(),
            identity_file: controller.proxy_keypath.clone(),
        });
        params.timeout = Duration::from_secs(options.timeout_secs);
        params.strict_host_key_checking = options.strict_host_key_checking;
        params
    }

    pub fn target(&self, host: impl Into<String>) -> SshTarget {
        SshTarget {
            host: host.into(),
            params: self.clone(),
        }
    }
}

/// A host bound to a set of connection parameters
#[derive(Debug, Clone)]
pub struct SshTarget {
    host: String,
    params: ConnectParams,
}

impl SshTarget {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Arguments passed to `ssh` to run `remote_command` on this host
    fn args(&self, remote_command: &str) -> Vec<String> {
        let p = &self.params;
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", p.timeout.as_secs().max(1)),
        ];

        if !p.strict_host_key_checking {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=no".to_string());
        }

        if let Some(port) = p.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }

        if let Some(identity) = &p.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }

        if let Some(proxy) = &p.proxy {
            match &proxy.identity_file {
                // ProxyJump cannot carry its own key
                Some(key) => {
                    args.push("-o".to_string());
                    args.push(format!(
                        "ProxyCommand=ssh -o BatchMode=yes -i {} -W %h:%p {}",
                        shell_quote(&key.to_string_lossy()),
                        shell_quote(&format!("{}@{}", proxy.user, proxy.host))
                    ));
                }
                None => {
                    args.push("-J".to_string());
                    args.push(format!("{}@{}", proxy.user, proxy.host));
                }
            }
        }

        args.push(format!("{}@{}", p.user, self.host));
        args.push(remote_command.to_string());
        args
    }

    /// Run a command on the host and return its stdout.
    /// A non-zero exit status is an error carrying stderr.
    pub async fn run(&self, remote_command: &str) -> Result<String> {
        tracing::debug!("ssh {}: {}", self.host, remote_command);
        self.exec(remote_command, None).await
    }

    /// Run `remote_command` with `env` exported first. The variables are
    /// written to the remote shell's stdin, so they never appear in the log
    /// or on either command line.
    pub async fn run_with_env(&self, env: &[(&str, String)], remote_command: &str) -> Result<String> {
        tracing::debug!(
            "ssh {}: {} (with {} exported variables)",
            self.host,
            remote_command,
            env.len()
        );
        self.exec(REMOTE_SHELL, Some(stdin_script(env, remote_command))).await
    }

    async fn exec(&self, remote_command: &str, stdin: Option<String>) -> Result<String> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.args(remote_command))
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let session = async {
            let mut child = cmd.spawn()?;
            if let (Some(script), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(script.as_bytes()).await?;
                pipe.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.params.timeout, session)
            .await
            .map_err(|_| AdminError::Timeout {
                host: self.host.clone(),
                after: self.params.timeout,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdminError::Remote {
                host: self.host.clone(),
                message: format!("{} ({})", stderr.trim(), output.status),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Shell fed to `sh -s`: exports first, then the command
fn stdin_script(env: &[(&str, String)], remote_command: &str) -> String {
    let mut script: String = env
        .iter()
        .map(|(name, value)| format!("export {}={}\n", name, shell_quote(value)))
        .collect();
    script.push_str(remote_command);
    script.push('\n');
    script
}

/// Quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_without_options() {
        let target = ConnectParams::new("root").target("10.0.0.5");
        let args = target.args("uptime");

        assert_eq!(&args[args.len() - 2..], &["root@10.0.0.5".to_string(), "uptime".to_string()]);
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(!args.contains(&"-J".to_string()));
    }

    fn bastion_controller() -> ControllerConfig {
        let mut controller = ControllerConfig::new("clc.example.com");
        controller.username = "admin".to_string();
        controller.keypath = Some(PathBuf::from("/keys/id_rsa"));
        controller.proxy_hostname = Some("bastion".to_string());
        controller.proxy_username = "jump".to_string();
        controller
    }

    #[test]
    fn test_target_keeps_shared_params() {
        let options = SshOptions {
            timeout_secs: 5,
            strict_host_key_checking: true,
        };
        let params = ConnectParams::from_config(&bastion_controller(), &options);

        let args = params.target("10.0.0.7").args("true");
        let joined = args.join(" ");

        assert!(joined.contains("-i /keys/id_rsa"));
        assert!(joined.contains("-J jump@bastion"));
        assert!(joined.contains("ConnectTimeout=5"));
        assert!(joined.contains("admin@10.0.0.7"));
        assert!(!joined.contains("StrictHostKeyChecking=no"));
    }

    #[test]
    fn test_proxy_command_quotes_key_path() {
        let mut controller = bastion_controller();
        controller.proxy_keypath = Some(PathBuf::from("/keys/my bastion key"));
        let params = ConnectParams::from_config(&controller, &SshOptions::default());

        let args = params.target("10.0.0.7").args("true");
        let proxy = args
            .iter()
            .find(|a| a.starts_with("ProxyCommand="))
            .unwrap();

        assert_eq!(
            proxy,
            "ProxyCommand=ssh -o BatchMode=yes -i '/keys/my bastion key' -W %h:%p 'jump@bastion'"
        );
        assert!(!args.contains(&"-J".to_string()));
    }

    #[test]
    fn test_exported_env_stays_off_command_line() {
        let target = ConnectParams::new("root").target("10.0.0.5");
        let env = [
            ("EC2_ACCESS_KEY", "AK".to_string()),
            ("EC2_SECRET_KEY", "TOPSECRET".to_string()),
        ];

        let args = target.args(REMOTE_SHELL);
        assert_eq!(args.last().map(String::as_str), Some("sh -s"));
        assert!(args.iter().all(|a| !a.contains("TOPSECRET")));

        let script = stdin_script(&env, "euserv-describe-services");
        assert_eq!(
            script,
            "export EC2_ACCESS_KEY='AK'\nexport EC2_SECRET_KEY='TOPSECRET'\neuserv-describe-services\n"
        );
    }

    #[test]
    fn test_controller_hostname_not_propagated() {
        let mut controller = ControllerConfig::new("clc.example.com");
        controller.keypath = Some(PathBuf::from("/keys/clc"));
        let params = ConnectParams::from_config(&controller, &SshOptions::default());

        let joined = params.target("10.0.0.9").args("true").join(" ");
        assert!(joined.contains("root@10.0.0.9"));
        assert!(!joined.contains("clc.example.com"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("abc"), "'abc'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
