//! Deterministic in-memory executor for tests.

use super::RemoteExecutor;
use crate::errors::TransportError;
use crate::types::{EndpointId, ExecOutput, ExecRequest};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted rule answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Output(ExecOutput),
    /// Round-trip fails with [`TransportError::Connection`].
    ConnectionFailure(String),
    /// Round-trip fails with [`TransportError::Timeout`].
    Timeout,
}

impl From<ExecOutput> for ScriptedReply {
    fn from(output: ExecOutput) -> Self {
        Self::Output(output)
    }
}

/// One `execute` call as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub endpoint: EndpointId,
    pub command: String,
    pub privileged: bool,
    pub user: Option<String>,
}

#[derive(Debug)]
struct Rule {
    endpoint: Option<EndpointId>,
    pattern: String,
    queue: VecDeque<ScriptedReply>,
    sticky: Option<ScriptedReply>,
}

impl Rule {
    fn matches(&self, request: &ExecRequest) -> bool {
        self.endpoint
            .as_ref()
            .is_none_or(|e| e == &request.endpoint)
            && request.command.contains(&self.pattern)
    }
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<Rule>,
    calls: Vec<RecordedCall>,
}

/// Replays scripted replies keyed by command substring.
///
/// For each call the first rule (in registration order) whose pattern is
/// contained in the command and which still has a queued reply answers,
/// FIFO. When no queued reply matches, the most recently registered
/// `always` reply for a matching rule is used, and otherwise the call
/// succeeds with empty output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<State>>,
    latency: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long (on the tokio clock) before answering each call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a reply for commands containing `pattern` on any endpoint.
    pub fn push(&self, pattern: &str, reply: impl Into<ScriptedReply>) -> &Self {
        self.push_rule(None, pattern, reply.into());
        self
    }

    /// Queue a reply for commands containing `pattern` on `endpoint`.
    pub fn push_on(&self, endpoint: &str, pattern: &str, reply: impl Into<ScriptedReply>) -> &Self {
        self.push_rule(Some(EndpointId::new(endpoint)), pattern, reply.into());
        self
    }

    /// Queue several replies in order.
    pub fn push_sequence<R: Into<ScriptedReply>>(
        &self,
        pattern: &str,
        replies: impl IntoIterator<Item = R>,
    ) -> &Self {
        for reply in replies {
            self.push(pattern, reply);
        }
        self
    }

    /// Answer every otherwise-unscripted matching command with `reply`.
    pub fn always(&self, pattern: &str, reply: impl Into<ScriptedReply>) -> &Self {
        self.state
            .lock()
            .expect("scripted executor mutex poisoned")
            .rules
            .push(Rule {
                endpoint: None,
                pattern: pattern.to_string(),
                queue: VecDeque::new(),
                sticky: Some(reply.into()),
            });
        self
    }

    fn push_rule(&self, endpoint: Option<EndpointId>, pattern: &str, reply: ScriptedReply) {
        let mut state = self.state.lock().expect("scripted executor mutex poisoned");
        if let Some(rule) = state
            .rules
            .iter_mut()
            .find(|r| r.endpoint == endpoint && r.pattern == pattern && r.sticky.is_none())
        {
            rule.queue.push_back(reply);
            return;
        }
        state.rules.push(Rule {
            endpoint,
            pattern: pattern.to_string(),
            queue: VecDeque::from([reply]),
            sticky: None,
        });
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state
            .lock()
            .expect("scripted executor mutex poisoned")
            .calls
            .clone()
    }

    /// Commands received so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    /// Commands received for one endpoint, in order.
    #[must_use]
    pub fn commands_on(&self, endpoint: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.endpoint.as_str() == endpoint)
            .map(|c| c.command)
            .collect()
    }

    /// Number of queued replies not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .expect("scripted executor mutex poisoned")
            .rules
            .iter()
            .map(|r| r.queue.len())
            .sum()
    }

    fn answer(&self, request: &ExecRequest) -> ScriptedReply {
        let mut state = self.state.lock().expect("scripted executor mutex poisoned");
        state.calls.push(RecordedCall {
            endpoint: request.endpoint.clone(),
            command: request.command.clone(),
            privileged: request.privileged,
            user: request.credentials.as_ref().map(|c| c.user.clone()),
        });

        if let Some(reply) = state
            .rules
            .iter_mut()
            .find(|r| !r.queue.is_empty() && r.matches(request))
            .and_then(|r| r.queue.pop_front())
        {
            return reply;
        }

        state
            .rules
            .iter()
            .rev()
            .find(|r| r.sticky.is_some() && r.matches(request))
            .and_then(|r| r.sticky.clone())
            .unwrap_or_else(|| ScriptedReply::Output(ExecOutput::default()))
    }
}

impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, request: &ExecRequest) -> Result<ExecOutput, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.answer(request) {
            ScriptedReply::Output(output) => Ok(output),
            ScriptedReply::ConnectionFailure(detail) => Err(TransportError::Connection {
                endpoint: request.endpoint.clone(),
                detail,
            }),
            ScriptedReply::Timeout => Err(TransportError::Timeout {
                endpoint: request.endpoint.clone(),
                timeout: request.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(endpoint: &str, command: &str) -> ExecRequest {
        ExecRequest::new(EndpointId::new(endpoint), command, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_fifo_then_sticky_then_default() {
        let exec = ScriptedExecutor::new();
        exec.always("show_plan", ExecOutput::ok(&["Plan Status: Successful"]));
        exec.push_sequence(
            "show_plan",
            [
                ExecOutput::ok(&["Plan Status: Running"]),
                ExecOutput::ok(&["Plan Status: Stopping"]),
            ],
        );

        let first = exec.execute(&req("ms1", "litp show_plan -a")).await.unwrap();
        let second = exec.execute(&req("ms1", "litp show_plan -a")).await.unwrap();
        let third = exec.execute(&req("ms1", "litp show_plan -a")).await.unwrap();
        let other = exec.execute(&req("ms1", "uptime")).await.unwrap();

        assert_eq!(first.stdout, vec!["Plan Status: Running"]);
        assert_eq!(second.stdout, vec!["Plan Status: Stopping"]);
        assert_eq!(third.stdout, vec!["Plan Status: Successful"]);
        assert!(other.success() && other.stdout.is_empty());
        assert_eq!(exec.pending(), 0);
        assert_eq!(exec.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_endpoint_scoped_rules() {
        let exec = ScriptedExecutor::new();
        exec.push_on("node1", "remove", ExecOutput::failed(1, &["ValidationError"]));

        let ms1 = exec.execute(&req("ms1", "litp remove -p /a")).await.unwrap();
        let node1 = exec.execute(&req("node1", "litp remove -p /a")).await.unwrap();

        assert!(ms1.success());
        assert_eq!(node1.exit_code, 1);
        assert_eq!(exec.commands_on("node1"), vec!["litp remove -p /a"]);
    }

    #[tokio::test]
    async fn test_transport_failures() {
        let exec = ScriptedExecutor::new();
        exec.push("show_plan", ScriptedReply::ConnectionFailure("refused".into()));
        exec.push("show_plan", ScriptedReply::Timeout);

        let err = exec.execute(&req("ms1", "litp show_plan")).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. }));
        let err = exec.execute(&req("ms1", "litp show_plan")).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_uses_tokio_clock() {
        let exec = ScriptedExecutor::new().with_latency(Duration::from_secs(30));
        let start = tokio::time::Instant::now();
        exec.execute(&req("ms1", "true")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
