//! Process-wide `tracing` setup.
//!
//! [`init_logging`] installs one registry with three layers: an `EnvFilter`,
//! a stdout formatter, and [`LoggerSinkLayer`], which mirrors events into the
//! host's [`LoggerSink`] as [`LogEntry`] values.
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::time::LogLevel;
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug)
//!         .with_logger_sink(host_sink),
//! )?;
//! ```
//!
//! Values handed to the sink go through [`redact_if_sensitive`] unless
//! redaction is switched off. Profile e-mails must never leave the core in
//! clear text.

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const OWN_CRATES: [&str; 6] = [
    "bridge_traits",
    "core_runtime",
    "core_store",
    "core_sync",
    "core_service",
    "logbody_core",
];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored; the debug-build default
    Pretty,
    /// One JSON object per line; the release-build default
    Json,
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level applied to this workspace's crates when no `filter` is given.
    /// Everything else logs at `warn`.
    pub level: LogLevel,
    /// Full `EnvFilter` directive string, e.g. `"core_sync=trace,sqlx=info"`
    pub filter: Option<String>,
    pub redact_pii: bool,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Log span open and close on stdout
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            redact_pii: true,
            logger_sink: None,
            span_events: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("redact_pii", &self.redact_pii)
            .field("has_sink", &self.logger_sink.is_some())
            .field("span_events", &self.span_events)
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(self, format: LogFormat) -> Self {
        Self { format, ..self }
    }

    pub fn with_level(self, level: LogLevel) -> Self {
        Self { level, ..self }
    }

    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..self
        }
    }

    pub fn with_pii_redaction(self, redact_pii: bool) -> Self {
        Self { redact_pii, ..self }
    }

    pub fn with_logger_sink(self, sink: Arc<dyn LoggerSink>) -> Self {
        Self {
            logger_sink: Some(sink),
            ..self
        }
    }

    pub fn with_span_events(self, span_events: bool) -> Self {
        Self {
            span_events,
            ..self
        }
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let directives = match &self.filter {
            Some(custom) => custom.clone(),
            None => default_directives(self.level),
        };
        EnvFilter::try_new(&directives)
            .map_err(|err| Error::Config(format!("Invalid log filter '{directives}': {err}")))
    }
}

fn default_directives(level: LogLevel) -> String {
    let mut directives = String::from("warn");
    for krate in OWN_CRATES {
        directives.push_str(&format!(",{krate}={}", level.as_str()));
    }
    directives.push_str(",sqlx=warn");
    directives
}

/// Install the global subscriber. Fails with [`Error::Config`] on a bad
/// filter or when a subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;
    let spans = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_span_events(spans);
    let stdout = match config.format {
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Json => base.json().flatten_event(true).boxed(),
    };

    let mirror = config
        .logger_sink
        .clone()
        .map(|sink| LoggerSinkLayer::new(sink, config.redact_pii));

    tracing_subscriber::registry()
        .with(stdout)
        .with(mirror)
        .with(filter)
        .try_init()
        .map_err(|err| Error::Config(format!("Logging already initialized: {err}")))
}

/// Mirrors each event into a [`LoggerSink`].
///
/// Inside a tokio runtime the sink call is spawned; elsewhere it runs to
/// completion on the calling thread.
pub struct LoggerSinkLayer {
    sink: Arc<dyn LoggerSink>,
    redact: bool,
}

impl LoggerSinkLayer {
    pub fn new(sink: Arc<dyn LoggerSink>, redact: bool) -> Self {
        Self { sink, redact }
    }

    fn deliver(&self, entry: LogEntry) {
        let sink = Arc::clone(&self.sink);
        let send = async move {
            if let Err(err) = sink.log(entry).await {
                eprintln!("logger sink rejected entry: {err}");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(send);
            }
            Err(_) => futures::executor::block_on(send),
        }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        let level = to_log_level(meta.level());
        if level < self.sink.min_level() {
            return;
        }

        let mut collected = FieldCollector {
            redact: self.redact,
            message: None,
            fields: HashMap::new(),
        };
        event.record(&mut collected);

        let mut entry = LogEntry::new(
            level,
            meta.target(),
            collected.message.unwrap_or_else(|| meta.name().to_owned()),
        );
        entry.fields = collected.fields;
        if let Some(span) = ctx.event_span(event) {
            entry = entry.in_span(span.name());
        }

        self.deliver(entry);
    }
}

fn to_log_level(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        Level::DEBUG => LogLevel::Debug,
        Level::TRACE => LogLevel::Trace,
    }
}

struct FieldCollector {
    redact: bool,
    message: Option<String>,
    fields: HashMap<String, String>,
}

impl FieldCollector {
    fn push(&mut self, field: &Field, raw: String) {
        let name = field.name();
        let value = if self.redact {
            redact_if_sensitive(name, &raw)
        } else {
            raw
        };
        match name {
            "message" => self.message = Some(value),
            _ => {
                self.fields.insert(name.to_owned(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_owned());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, value.to_string());
    }

    // Numbers and bools arrive here too through the default `record_*` impls
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }
}

/// Mask a value before it leaves the process.
///
/// Credentials are matched by field name. E-mail addresses are matched by
/// field name or by shape anywhere in the value, and reduced to their first
/// character.
///
/// ```
/// use core_runtime::logging::redact_if_sensitive;
///
/// assert_eq!(redact_if_sensitive("access_token", "abc"), "[REDACTED]");
/// assert_eq!(redact_if_sensitive("email", "sam@example.com"), "s***@[REDACTED]");
/// assert_eq!(redact_if_sensitive("entity_type", "profiles"), "profiles");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    let name = field_name.to_ascii_lowercase();
    let is_credential = ["token", "password", "secret", "api_key", "authorization", "bearer"]
        .iter()
        .any(|needle| name.contains(needle));
    if is_credential {
        return REDACTED.to_owned();
    }

    if !name.contains("email") && !contains_email(value) {
        return value.to_owned();
    }
    value
        .chars()
        .next()
        .map(|first| format!("{first}***@{REDACTED}"))
        .unwrap_or_default()
}

fn contains_email(value: &str) -> bool {
    value
        .split_whitespace()
        .filter_map(|word| word.split_once('@'))
        .any(|(local, domain)| !local.is_empty() && domain.contains('.'))
}

/// Last component of a path, for logging database locations without the
/// user's directory layout.
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
