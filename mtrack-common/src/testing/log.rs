//! JSONL test logging.
//!
//! Each guarded test writes `target/test-logs/<test>.jsonl` with its phases,
//! the remote commands it issued and any cleanup report, so a failed CI run
//! can be replayed without re-running the endpoints.
//!
//! ```ignore
//! #[tokio::test]
//! async fn test_cleanup_scenario() {
//!     let guard = mtrack_common::test_guard!();
//!     // ...
//!     guard.log_commands(&executor.commands());
//! }
//! ```

use crate::cleanup::CleanupReport;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;
use tracing_subscriber::prelude::*;

/// Test execution phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    Setup,
    Execute,
    /// Session cleanup is running.
    Cleanup,
    Verify,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Execute => write!(f, "execute"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Verify => write!(f, "verify"),
        }
    }
}

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Install a test-writer subscriber once per process.
///
/// Level comes from `MTRACK_TEST_LOG_LEVEL` (default `info`).
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let level = std::env::var("MTRACK_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "mtrack={level},mtrack_common={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .try_init();
    });
}

/// A single JSONL record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    pub timestamp: String,
    pub test_name: String,
    pub phase: TestPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TestLogEntry {
    pub fn new(test_name: &str, phase: TestPhase, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            test_name: test_name.to_string(),
            phase,
            message: message.into(),
            data: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Writes one JSONL file per test and keeps entries in memory.
pub struct TestLogger {
    test_name: String,
    start_time: Instant,
    entries: Mutex<Vec<TestLogEntry>>,
    log_file: Option<Mutex<std::fs::File>>,
}

impl TestLogger {
    pub fn for_test(test_name: &str) -> Self {
        let logger = Self {
            test_name: test_name.to_string(),
            start_time: Instant::now(),
            entries: Mutex::new(Vec::new()),
            log_file: create_log_file(test_name).ok().map(Mutex::new),
        };
        logger.log(TestPhase::Setup, "TEST START");
        logger
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        let entry = TestLogEntry::new(&self.test_name, phase, message)
            .with_duration(self.elapsed_ms());
        self.write_entry(entry);
    }

    pub fn log_with_data(
        &self,
        phase: TestPhase,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        let entry = TestLogEntry::new(&self.test_name, phase, message)
            .with_duration(self.elapsed_ms())
            .with_data(data);
        self.write_entry(entry);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn entries(&self) -> Vec<TestLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn write_entry(&self, entry: TestLogEntry) {
        if let Some(file) = &self.log_file
            && let Ok(mut f) = file.lock()
            && let Ok(json) = serde_json::to_string(&entry)
        {
            let _ = writeln!(f, "{json}");
        }

        tracing::info!(
            test = %self.test_name,
            phase = %entry.phase,
            duration_ms = entry.duration_ms,
            "{}",
            entry.message
        );

        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

fn create_log_file(test_name: &str) -> std::io::Result<std::fs::File> {
    let log_dir = find_target_dir().join("test-logs");
    std::fs::create_dir_all(&log_dir)?;
    let safe_name = test_name.replace("::", "_").replace(['/', '\\'], "_");
    std::fs::File::create(log_dir.join(format!("{safe_name}.jsonl")))
}

fn find_target_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}

/// Logs TEST PASS on drop, or TEST FAIL when dropped during a panic.
///
/// Enabled by `MTRACK_TEST_LOGGING=1`, or by default when `CI` is set.
/// Disabled guards are no-ops.
pub struct TestGuard {
    inner: Option<TestLogger>,
}

impl TestGuard {
    pub fn new(test_name: &str) -> Self {
        Self {
            inner: if Self::is_enabled() {
                init_global_test_logging();
                Some(TestLogger::for_test(test_name))
            } else {
                None
            },
        }
    }

    fn is_enabled() -> bool {
        match std::env::var("MTRACK_TEST_LOGGING").as_deref() {
            Ok("1" | "true") => true,
            Ok("0" | "false") => false,
            _ => std::env::var("CI").is_ok(),
        }
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        if let Some(logger) = &self.inner {
            logger.log(phase, message);
        }
    }

    /// Record the remote commands a test issued, in order.
    pub fn log_commands(&self, commands: &[String]) {
        if let Some(logger) = &self.inner {
            logger.log_with_data(
                TestPhase::Execute,
                format!("{} remote command(s)", commands.len()),
                serde_json::json!({ "commands": commands }),
            );
        }
    }

    pub fn log_report(&self, report: &CleanupReport) {
        if let Some(logger) = &self.inner {
            let data = serde_json::to_value(report).unwrap_or(serde_json::Value::Null);
            logger.log_with_data(TestPhase::Cleanup, "cleanup report", data);
        }
    }
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        if let Some(logger) = self.inner.take() {
            if std::thread::panicking() {
                logger.log_with_data(
                    TestPhase::Verify,
                    "TEST FAIL",
                    serde_json::json!({ "reason": "test panicked" }),
                );
            } else {
                logger.log(TestPhase::Verify, "TEST PASS");
            }
        }
    }
}

/// Create a [`TestGuard`] named after the enclosing test function.
#[macro_export]
macro_rules! test_guard {
    () => {{
        fn _f() {}
        fn _type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = _type_name_of(_f);
        let name = name.strip_suffix("::_f").unwrap_or(name);
        let name = name.rsplit("::").next().unwrap_or(name);
        $crate::testing::TestGuard::new(name)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_serializes_phase_snake_case() {
        let entry = TestLogEntry::new("t", TestPhase::Cleanup, "msg").with_duration(7);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"phase\":\"cleanup\""));
        assert!(json.contains("\"duration_ms\":7"));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_logger_keeps_entries() {
        let logger = TestLogger::for_test("test_logger_keeps_entries");
        logger.log(TestPhase::Execute, "running");
        logger.log_with_data(
            TestPhase::Verify,
            "checked",
            serde_json::json!({"ok": true}),
        );
        let entries = logger.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "TEST START");
        assert_eq!(entries[2].data, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn test_guard_macro_names_test() {
        let guard = crate::test_guard!();
        guard.log(TestPhase::Execute, "inside");
        guard.log_commands(&["litp show_plan -a".to_string()]);
        guard.log_report(&CleanupReport::default());
    }

    #[test]
    fn test_disabled_guard_is_noop() {
        let guard = TestGuard { inner: None };
        guard.log(TestPhase::Execute, "ignored");
        guard.log_commands(&[]);
    }
}
