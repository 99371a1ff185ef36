use std::env;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "./logs/dupe-sieve.log";

/// Where and how much to log, read from `TRACING_LEVEL` and `LOG_FILE_PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    filter: String,
    file: PathBuf,
}

impl LogSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            filter: non_empty("TRACING_LEVEL").unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            file: non_empty("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }

    /// Directory and file name for the appender; a bare name logs into `.`.
    fn file_parts(&self) -> (&Path, &OsStr) {
        let directory = self
            .file
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = self
            .file
            .file_name()
            .unwrap_or_else(|| OsStr::new("dupe-sieve.log"));
        (directory, name)
    }
}

/// Pretty stdout for the operator plus a plain copy of every event in the
/// log file. Keep the guard alive until exit so buffered file output lands.
pub fn init_logger() -> WorkerGuard {
    let settings = LogSettings::from_lookup(|key| env::var(key).ok());
    let (directory, name) = settings.file_parts();
    let (file_writer, guard) = tracing_appender::non_blocking(rolling::never(directory, name));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stdout)
                .pretty()
                .with_file(false)
                .with_target(false)
                .without_time()
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_thread_names(true)
                .with_ansi(false),
        )
        .with(EnvFilter::new(&settings.filter))
        .init();

    info!(
        "Logging at '{}' to stdout and {}",
        settings.filter,
        settings.file.display()
    );

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset_or_blank() {
        let settings = LogSettings::from_lookup(|key| {
            (key == "TRACING_LEVEL").then(|| "  ".to_string())
        });
        assert_eq!(settings.filter, "info");
        assert_eq!(settings.file, PathBuf::from("./logs/dupe-sieve.log"));
        let (directory, name) = settings.file_parts();
        assert_eq!(directory, Path::new("./logs"));
        assert_eq!(name, "dupe-sieve.log");
    }

    #[test]
    fn test_bare_file_name_logs_in_working_directory() {
        let settings = LogSettings::from_lookup(|key| match key {
            "TRACING_LEVEL" => Some("dupe_sieve_core=debug".to_string()),
            "LOG_FILE_PATH" => Some("run.log".to_string()),
            _ => None,
        });
        assert_eq!(settings.filter, "dupe_sieve_core=debug");
        assert_eq!(settings.file_parts(), (Path::new("."), OsStr::new("run.log")));
    }
}
