//! Common types shared by the executor, ledger and cleanup layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Name of a remote node the harness talks to (e.g. `ms1`, `node2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(pub String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Alternate login identity for a single call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Address family used to reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Let ssh pick.
    #[default]
    Any,
    /// Force IPv4 (`ssh -4`).
    Ipv4,
    /// Force IPv6 (`ssh -6`).
    Ipv6,
}

impl Transport {
    /// The ssh flag selecting this address family, if any.
    pub fn ssh_flag(self) -> Option<&'static str> {
        match self {
            Self::Any => None,
            Self::Ipv4 => Some("-4"),
            Self::Ipv6 => Some("-6"),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// A single command to run on a remote endpoint.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub endpoint: EndpointId,
    pub command: String,
    pub credentials: Option<Credentials>,
    pub transport: Transport,
    pub privileged: bool,
    pub timeout: Duration,
}

impl ExecRequest {
    pub fn new(endpoint: EndpointId, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint,
            command: command.into(),
            credentials: None,
            transport: Transport::Any,
            privileged: false,
            timeout,
        }
    }

    #[must_use]
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }
}

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
}

impl ExecOutput {
    /// Build an output from raw process streams, splitting into lines.
    pub fn from_raw(stdout: &[u8], stderr: &[u8], exit_code: i32) -> Self {
        Self {
            stdout: split_lines(stdout),
            stderr: split_lines(stderr),
            exit_code,
        }
    }

    pub fn ok(stdout: &[&str]) -> Self {
        Self {
            stdout: stdout.iter().map(|s| (*s).to_string()).collect(),
            stderr: Vec::new(),
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: &[&str]) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.iter().map(|s| (*s).to_string()).collect(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr joined into a single string for error reporting.
    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

fn split_lines(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("litp-admin", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("litp-admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_transport_flags() {
        assert_eq!(Transport::Any.ssh_flag(), None);
        assert_eq!(Transport::Ipv4.ssh_flag(), Some("-4"));
        assert_eq!(Transport::Ipv6.ssh_flag(), Some("-6"));
    }

    #[test]
    fn test_exec_output_from_raw_splits_lines() {
        let output = ExecOutput::from_raw(b"one\r\ntwo\n", b"", 0);
        assert_eq!(output.stdout, vec!["one", "two"]);
        assert!(output.stderr.is_empty());
        assert!(output.success());
    }

    #[test]
    fn test_transport_serde_snake_case() {
        let parsed: Transport = serde_json::from_str("\"ipv6\"").unwrap();
        assert_eq!(parsed, Transport::Ipv6);
    }
}
