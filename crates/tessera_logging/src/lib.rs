//! Shared logging setup for Tessera binaries.
//!
//! Every run writes to a size-rotated file under `$TESSERA_HOME/logs` and
//! mirrors to stderr. `RUST_LOG` overrides the default filter for both.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "tessera=info,tessera_schema=info,tessera_db=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "TESSERA_HOME";

pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter to stderr (`-v`).
    pub verbose: bool,
    /// Only warnings and errors on stderr (`-q`).
    pub quiet: bool,
    /// Explicit log directory; defaults to [`logs_dir`].
    pub log_dir: Option<PathBuf>,
}

impl<'a> LogConfig<'a> {
    pub fn new(app_name: &'a str) -> Self {
        Self {
            app_name,
            verbose: false,
            quiet: false,
            log_dir: None,
        }
    }
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir.clone() {
        Some(dir) => {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
            dir
        }
        None => ensure_logs_dir().context("Failed to ensure log directory")?,
    };
    let file_writer = SharedRollingWriter::new(log_dir, config.app_name)
        .context("Failed to initialize rolling log writer")?;

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = console_filter(&config, &file_filter);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(config.verbose)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Global tracing subscriber already installed")?;

    Ok(())
}

fn console_filter(config: &LogConfig<'_>, file_filter: &EnvFilter) -> EnvFilter {
    if config.verbose {
        EnvFilter::new(file_filter.to_string())
    } else if config.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::new("tessera=info,tessera_schema=warn,tessera_db=warn")
    }
}

/// The Tessera home directory: `$TESSERA_HOME` or `~/.tessera`.
pub fn tessera_home() -> PathBuf {
    if let Ok(override_path) = std::env::var(HOME_ENV) {
        if !override_path.trim().is_empty() {
            return PathBuf::from(override_path);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tessera")
}

/// `~/.tessera/logs`
pub fn logs_dir() -> PathBuf {
    tessera_home().join("logs")
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

struct RollingFileAppender {
    dir: PathBuf,
    base_name: String,
    max_files: usize,
    max_size: u64,
    file: Option<File>,
    current_size: u64,
}

impl RollingFileAppender {
    fn new(dir: PathBuf, base_name: &str, max_files: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut appender = Self {
            dir,
            base_name: sanitize_name(base_name),
            max_files: max_files.max(1),
            max_size,
            file: None,
            current_size: 0,
        };
        let (file, size) = appender.open_current_file()?;
        appender.file = Some(file);
        appender.current_size = size;
        if appender.current_size > appender.max_size {
            appender.rotate()?;
        }
        Ok(appender)
    }

    fn open_current_file(&self) -> io::Result<(File, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn current_path(&self) -> PathBuf {
        log_path(&self.dir, &self.base_name, 0)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        // app.log -> app.log.1 -> ... -> app.log.{max_files-1}, oldest removed
        let max_index = self.max_files.saturating_sub(1);
        if max_index > 0 {
            let oldest = log_path(&self.dir, &self.base_name, max_index);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for idx in (1..max_index).rev() {
                let src = log_path(&self.dir, &self.base_name, idx);
                if src.exists() {
                    fs::rename(&src, log_path(&self.dir, &self.base_name, idx + 1))?;
                }
            }
            let current = self.current_path();
            if current.exists() {
                fs::rename(current, log_path(&self.dir, &self.base_name, 1))?;
            }
        } else {
            fs::remove_file(self.current_path()).or_else(|e| match e.kind() {
                io::ErrorKind::NotFound => Ok(()),
                _ => Err(e),
            })?;
        }

        let (file, size) = self.open_current_file()?;
        self.file = Some(file);
        self.current_size = size;
        Ok(())
    }
}

fn log_path(dir: &Path, base_name: &str, index: usize) -> PathBuf {
    if index == 0 {
        dir.join(format!("{}.log", base_name))
    } else {
        dir.join(format!("{}.log.{}", base_name, index))
    }
}

impl Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size > 0 && self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct SharedRollingWriter {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl SharedRollingWriter {
    fn new(dir: PathBuf, base_name: &str) -> Result<Self> {
        let appender = RollingFileAppender::new(dir, base_name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file for {}", base_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(appender)),
        })
    }
}

struct SharedRollingWriterGuard {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = SharedRollingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedRollingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedRollingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("tessera cli/v1"), "tessera_cli_v1");
        assert_eq!(sanitize_name("tessera-db_2"), "tessera-db_2");
    }

    #[test]
    fn test_rotation_keeps_bounded_files() {
        let tmp = TempDir::new().unwrap();
        let mut appender = RollingFileAppender::new(tmp.path().to_path_buf(), "tessera", 3, 16).unwrap();

        for i in 0..10 {
            let line = format!("line {:02} padded\n", i);
            appender.write_all(line.as_bytes()).unwrap();
        }
        appender.flush().unwrap();

        let dir = tmp.path();
        assert!(log_path(dir, "tessera", 0).exists());
        assert!(log_path(dir, "tessera", 1).exists());
        assert!(log_path(dir, "tessera", 2).exists());
        assert!(!log_path(dir, "tessera", 3).exists());

        let newest = fs::read_to_string(log_path(dir, "tessera", 0)).unwrap();
        assert!(newest.contains("line 09"));
    }

    #[test]
    fn test_reopen_appends() {
        let tmp = TempDir::new().unwrap();
        {
            let mut appender = RollingFileAppender::new(tmp.path().to_path_buf(), "app", 2, 1024).unwrap();
            appender.write_all(b"first\n").unwrap();
        }
        let mut appender = RollingFileAppender::new(tmp.path().to_path_buf(), "app", 2, 1024).unwrap();
        assert_eq!(appender.current_size, 6);
        appender.write_all(b"second\n").unwrap();
        appender.flush().unwrap();

        let content = fs::read_to_string(log_path(tmp.path(), "app", 0)).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }
}
