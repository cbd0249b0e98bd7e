//! Tracing setup: compact stdout logs plus an appended log file.
//!
//! `BROCHURE_RAG_LOG_FILE` names the file; without it logs go to `logs/brochure-rag.log`.
//! Set `BROCHURE_RAG_LOG_FILE=off` to log to stdout only.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_ENV: &str = "BROCHURE_RAG_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_NAME: &str = "brochure-rag.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where file logs should be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Stdout only.
    Disabled,
    /// Append to an explicit file.
    File(PathBuf),
    /// Daily-unrotated file under the default directory.
    Default,
}

impl LogTarget {
    /// Interpret the value of `BROCHURE_RAG_LOG_FILE`.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Default,
            Some(off) if off.eq_ignore_ascii_case("off") => Self::Disabled,
            Some(path) => Self::File(PathBuf::from(path)),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` filters (default `info`).
///
/// Calling it again is harmless; only the first call installs anything.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let target = LogTarget::from_setting(std::env::var(LOG_FILE_ENV).ok().as_deref());
    let result = match file_writer(&target) {
        Some(writer) => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_ansi(false)
                    .compact(),
            )
            .try_init(),
        None => registry.try_init(),
    };
    if let Err(err) = result {
        eprintln!("Tracing already initialised: {err}");
    }
}

fn file_writer(target: &LogTarget) -> Option<NonBlocking> {
    let (non_blocking, guard) = match target {
        LogTarget::Disabled => return None,
        LogTarget::File(path) => {
            let file = open_append(path)?;
            tracing_appender::non_blocking(file)
        }
        LogTarget::Default => {
            if let Err(err) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
                eprintln!("Failed to create {DEFAULT_LOG_DIR} directory: {err}");
                return None;
            }
            tracing_appender::non_blocking(tracing_appender::rolling::never(
                DEFAULT_LOG_DIR,
                DEFAULT_LOG_NAME,
            ))
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(non_blocking)
}

fn open_append(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_target_parses_setting() {
        assert_eq!(LogTarget::from_setting(None), LogTarget::Default);
        assert_eq!(LogTarget::from_setting(Some("  ")), LogTarget::Default);
        assert_eq!(LogTarget::from_setting(Some("OFF")), LogTarget::Disabled);
        assert_eq!(
            LogTarget::from_setting(Some("/tmp/rag.log")),
            LogTarget::File(PathBuf::from("/tmp/rag.log"))
        );
    }

    #[test]
    fn explicit_file_is_created_with_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/rag.log");
        assert!(open_append(&path).is_some());
        assert!(path.exists());
    }
}
