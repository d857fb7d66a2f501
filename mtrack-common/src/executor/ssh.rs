//! `ssh` subprocess executor.

use super::RemoteExecutor;
use crate::config::{EndpointConfig, HarnessConfig};
use crate::errors::TransportError;
use crate::types::{EndpointId, ExecOutput, ExecRequest};
use crate::util::{mask_sensitive_command, redact_literal, shell_quote};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// ssh reserves exit status 255 for its own failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Executes commands by spawning the system `ssh` client, or
/// `sshpass -e ssh` when a password credential is supplied.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    endpoints: HashMap<EndpointId, EndpointConfig>,
    connect_timeout_secs: u64,
}

/// Fully resolved invocation for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SshInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Password exported as `SSHPASS`.
    pub sshpass: Option<String>,
    /// Bytes written to the remote command's stdin (sudo password).
    pub stdin: Option<String>,
}

impl SshExecutor {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            endpoints: config
                .endpoints
                .iter()
                .map(|e| (e.id.clone(), e.clone()))
                .collect(),
            connect_timeout_secs: config.timeouts.connect_secs,
        }
    }

    pub fn endpoint_ids(&self) -> impl Iterator<Item = &EndpointId> {
        self.endpoints.keys()
    }

    pub(crate) fn invocation(&self, request: &ExecRequest) -> Result<SshInvocation, TransportError> {
        let endpoint = self
            .endpoints
            .get(&request.endpoint)
            .ok_or_else(|| TransportError::UnknownEndpoint(request.endpoint.clone()))?;

        let (user, password) = match &request.credentials {
            Some(creds) => (creds.user.as_str(), Some(creds.password.clone())),
            None => (endpoint.user.as_str(), None),
        };

        let mut args: Vec<String> = Vec::new();
        let program = if password.is_some() {
            args.extend(["-e".to_string(), "ssh".to_string()]);
            "sshpass".to_string()
        } else {
            "ssh".to_string()
        };

        args.extend([
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ]);
        if password.is_some() {
            args.extend([
                "-o".to_string(),
                "PreferredAuthentications=password,keyboard-interactive".to_string(),
            ]);
        } else {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
            if let Some(identity) = endpoint.identity_path() {
                args.extend(["-i".to_string(), identity.display().to_string()]);
            }
        }
        if let Some(flag) = request.transport.ssh_flag().or(endpoint.transport.ssh_flag()) {
            args.push(flag.to_string());
        }
        if endpoint.port != 22 {
            args.extend(["-p".to_string(), endpoint.port.to_string()]);
        }
        args.push(format!("{}@{}", user, endpoint.host));

        let (remote, stdin) = if request.privileged && user != "root" {
            let wrapped = shell_quote(&request.command).into_owned();
            match &password {
                Some(pw) => (format!("sudo -S -p '' sh -c {wrapped}"), Some(format!("{pw}\n"))),
                None => (format!("sudo -n sh -c {wrapped}"), None),
            }
        } else {
            (request.command.clone(), None)
        };
        args.push(remote);

        Ok(SshInvocation {
            program,
            args,
            sshpass: password,
            stdin,
        })
    }
}

impl RemoteExecutor for SshExecutor {
    async fn execute(&self, request: &ExecRequest) -> Result<ExecOutput, TransportError> {
        let invocation = self.invocation(request)?;
        let endpoint = request.endpoint.clone();

        debug!(
            endpoint = %endpoint,
            command = %mask_sensitive_command(&request.command),
            privileged = request.privileged,
            "ssh exec"
        );

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(password) = &invocation.sshpass {
            cmd.env("SSHPASS", password);
        }

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            endpoint: endpoint.clone(),
            source,
        })?;

        if let Some(input) = &invocation.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|source| TransportError::Spawn {
                    endpoint: endpoint.clone(),
                    source,
                })?;
            drop(stdin);
        }

        let output = match tokio::time::timeout(request.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(TransportError::Spawn { endpoint, source }),
            Err(_) => {
                warn!(endpoint = %endpoint, timeout = ?request.timeout, "remote command timed out");
                return Err(TransportError::Timeout {
                    endpoint,
                    timeout: request.timeout,
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let mut result = ExecOutput::from_raw(&output.stdout, &output.stderr, exit_code);

        if let Some(password) = &invocation.sshpass {
            for line in result.stdout.iter_mut().chain(result.stderr.iter_mut()) {
                *line = redact_literal(line, password);
            }
        }

        if exit_code == SSH_CONNECTION_FAILURE {
            return Err(TransportError::Connection {
                endpoint,
                detail: result.stderr_text(),
            });
        }

        debug!(endpoint = %endpoint, exit_code, "ssh exec finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Credentials, Transport};
    use std::time::Duration;

    fn executor() -> SshExecutor {
        let config = HarnessConfig::from_toml_str(
            r#"
[timeouts]
connect_secs = 7

[[endpoints]]
id = "ms1"
host = "10.0.0.1"
identity_file = "/keys/id_rsa"

[[endpoints]]
id = "node1"
host = "node1.example"
user = "litp-admin"
port = 2222
transport = "ipv4"
"#,
        )
        .unwrap();
        SshExecutor::new(&config)
    }

    fn request(endpoint: &str, command: &str) -> ExecRequest {
        ExecRequest::new(EndpointId::new(endpoint), command, Duration::from_secs(5))
    }

    #[test]
    fn test_key_based_invocation() {
        let inv = executor().invocation(&request("ms1", "litp show_plan -a")).unwrap();
        assert_eq!(inv.program, "ssh");
        assert!(inv.args.contains(&"BatchMode=yes".to_string()));
        assert!(inv.args.contains(&"ConnectTimeout=7".to_string()));
        assert!(inv.args.windows(2).any(|w| w == ["-i", "/keys/id_rsa"]));
        assert_eq!(inv.args[inv.args.len() - 2], "root@10.0.0.1");
        assert_eq!(inv.args.last().unwrap(), "litp show_plan -a");
        assert!(inv.sshpass.is_none());
    }

    #[test]
    fn test_password_invocation_uses_sshpass() {
        let req = request("ms1", "whoami")
            .with_credentials(Some(Credentials::new("tester", "pw")))
            .with_transport(Transport::Ipv6);
        let inv = executor().invocation(&req).unwrap();
        assert_eq!(inv.program, "sshpass");
        assert_eq!(&inv.args[..2], ["-e", "ssh"]);
        assert!(!inv.args.contains(&"BatchMode=yes".to_string()));
        assert!(inv.args.contains(&"-6".to_string()));
        assert!(inv.args.contains(&"tester@10.0.0.1".to_string()));
        assert!(!inv.args.iter().any(|a| a == "pw"));
        assert_eq!(inv.sshpass.as_deref(), Some("pw"));
    }

    #[test]
    fn test_privileged_non_root_wraps_in_sudo() {
        let req = request("node1", "service puppet start").privileged(true);
        let inv = executor().invocation(&req).unwrap();
        assert_eq!(inv.args.last().unwrap(), "sudo -n sh -c 'service puppet start'");
        assert!(inv.args.contains(&"-4".to_string()));
        assert!(inv.args.windows(2).any(|w| w == ["-p", "2222"]));

        let req = request("node1", "userdel -r bob")
            .privileged(true)
            .with_credentials(Some(Credentials::new("litp-admin", "secret")));
        let inv = executor().invocation(&req).unwrap();
        assert_eq!(inv.args.last().unwrap(), "sudo -S -p '' sh -c 'userdel -r bob'");
        assert_eq!(inv.stdin.as_deref(), Some("secret\n"));
    }

    #[test]
    fn test_privileged_root_runs_directly() {
        let req = request("ms1", "rm -rf /tmp/x").privileged(true);
        let inv = executor().invocation(&req).unwrap();
        assert_eq!(inv.args.last().unwrap(), "rm -rf /tmp/x");
    }

    #[test]
    fn test_unknown_endpoint() {
        let err = executor().invocation(&request("nope", "true")).unwrap_err();
        assert!(matches!(err, TransportError::UnknownEndpoint(_)));
    }
}
