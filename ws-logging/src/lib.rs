use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::{Directive, ParseError},
    fmt::MakeWriter,
    prelude::*,
    registry, EnvFilter,
};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

// --- Custom "Tee" Writer ---
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A, B> Write for Tee<A, B>
where
    A: Write,
    B: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;
    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

/// Subscriber settings, normally read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
    pub file_path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Console,
            format: LogFormat::Human,
            file_path: PathBuf::from("/tmp/ws-server.log"),
        }
    }
}

impl LogConfig {
    /// Read `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT` and `LOG_FILE_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let output = match lookup("LOG_OUTPUT").as_deref() {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            _ => LogOutput::Console,
        };
        let format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };

        Self {
            level: lookup("LOG_LEVEL").unwrap_or(defaults.level),
            output,
            format,
            file_path: lookup("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_path),
        }
    }

    fn file_location(&self) -> (&Path, &std::ffi::OsStr) {
        let log_dir = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("/tmp"));
        let log_filename = self
            .file_path
            .file_name()
            .unwrap_or("ws-server.log".as_ref());
        (log_dir, log_filename)
    }
}

/// Build the level filter: `RUST_LOG` wins, then the configured level.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    let base = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidFilter {
            filter: level.to_string(),
            reason: e.to_string(),
        })?,
    };

    let mut filter = base;
    for directive in ["tokio=warn", "hyper=warn", "reqwest=warn"] {
        let parsed: Directive = directive
            .parse()
            .map_err(|e: ParseError| LoggingError::InvalidFilter {
                filter: directive.to_string(),
                reason: e.to_string(),
            })?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

/// Install the global tracing subscriber.
///
/// The returned guard must be held for as long as file output should be
/// flushed; dropping it stops the background writer.
pub fn init_subscriber(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = build_filter(&config.level)?;
    let is_json = config.format == LogFormat::Json;

    let mut guard: Option<WorkerGuard> = None;
    let subscriber = registry().with(env_filter);
    let (log_dir, log_filename) = config.file_location();

    let result = match config.output {
        LogOutput::Both => {
            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);

            let tee_writer = MakeTee {
                make_a: std::io::stdout,
                make_b: non_blocking,
            };

            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(tee_writer);
            if is_json {
                subscriber.with(fmt_layer.json()).try_init()
            } else {
                subscriber.with(fmt_layer).try_init()
            }
        }
        LogOutput::Console => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
            if is_json {
                subscriber.with(fmt_layer.json()).try_init()
            } else {
                subscriber.with(fmt_layer).try_init()
            }
        }
        LogOutput::File => {
            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            if is_json {
                subscriber.with(fmt_layer.json()).try_init()
            } else {
                subscriber.with(fmt_layer).try_init()
            }
        }
    };

    result.map_err(|e| LoggingError::Install(e.to_string()))?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = LogConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn test_reads_all_settings() {
        let config = LogConfig::from_lookup(lookup_from(&[
            ("LOG_LEVEL", "debug"),
            ("LOG_OUTPUT", "both"),
            ("LOG_FORMAT", "json"),
            ("LOG_FILE_PATH", "/var/log/ws/server.log"),
        ]));

        assert_eq!(config.level, "debug");
        assert_eq!(config.output, LogOutput::Both);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file_path, PathBuf::from("/var/log/ws/server.log"));

        let (dir, name) = config.file_location();
        assert_eq!(dir, Path::new("/var/log/ws"));
        assert_eq!(name, "server.log");
    }

    #[test]
    fn test_unknown_values_fall_back() {
        let config = LogConfig::from_lookup(lookup_from(&[
            ("LOG_OUTPUT", "syslog"),
            ("LOG_FORMAT", "xml"),
        ]));
        assert_eq!(config.output, LogOutput::Console);
        assert_eq!(config.format, LogFormat::Human);
    }

    #[test]
    fn test_tee_writes_to_both() {
        let mut tee = Tee {
            a: Vec::new(),
            b: Vec::new(),
        };
        tee.write_all(b"hello").unwrap();
        tee.flush().unwrap();
        assert_eq!(tee.a, b"hello");
        assert_eq!(tee.b, b"hello");
    }

    #[test]
    fn test_bare_filename_logs_to_tmp() {
        let config = LogConfig {
            file_path: PathBuf::from("server.log"),
            ..Default::default()
        };
        let (dir, name) = config.file_location();
        assert_eq!(dir, Path::new("/tmp"));
        assert_eq!(name, "server.log");
    }
}
