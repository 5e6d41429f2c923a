//! Integration tests for the logging pipeline

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, redact_if_sensitive, strip_path, LogFormat, LoggingConfig};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CapturingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CapturingSink {
    async fn log(&self, entry: LogEntry) -> BridgeResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Debug
    }
}

// Only one subscriber can be installed per process, so this is the single
// test here that calls `init_logging`.
#[test]
fn test_sink_receives_redacted_events() {
    let sink = Arc::new(CapturingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_filter("debug")
        .with_logger_sink(sink.clone());

    init_logging(config).unwrap();

    tracing::info!(
        entity_type = "profiles",
        email = "jane@example.com",
        access_token = "abc123",
        "Profile cached"
    );
    tracing::trace!("below the sink threshold");

    let entries = sink.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);

    let entry = &entries[0];
    assert_eq!(entry.level, LogLevel::Info);
    assert_eq!(entry.message, "Profile cached");
    assert_eq!(entry.fields["entity_type"], "profiles");
    assert_eq!(entry.fields["access_token"], "[REDACTED]");
    assert!(!entry.fields["email"].contains("example.com"));

    drop(entries);
    assert!(init_logging(LoggingConfig::default()).is_err());
}

#[test]
fn test_redaction_rules() {
    assert_eq!(redact_if_sensitive("refresh_token", "r-1"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("password", "hunter2"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("email", "user@example.com"), "u***@[REDACTED]");

    // E-mails are caught by shape even under an innocent field name
    assert_eq!(
        redact_if_sensitive("note", "contact bob@example.org"),
        "c***@[REDACTED]"
    );

    assert_eq!(redact_if_sensitive("entity_type", "body_metrics"), "body_metrics");
    assert_eq!(redact_if_sensitive("retry_count", "2"), "2");
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/data/user/0/app/files/logbody.db"), "logbody.db");
    assert_eq!(strip_path("C:\\Users\\Jane\\AppData\\logbody.db"), "logbody.db");
    assert_eq!(strip_path("logbody.db"), "logbody.db");
    assert_eq!(strip_path("/var/lib/"), "");
}

#[test]
fn test_format_selection() {
    #[cfg(debug_assertions)]
    assert_eq!(LoggingConfig::default().format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(LoggingConfig::default().format, LogFormat::Json);
}
