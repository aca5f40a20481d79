//! Logging, grounded on the model runtime's own `log::Log` implementation:
//! a single global logger choosing between stderr and an optional log file,
//! level controlled by an environment variable rather than a CLI flag alone
//! so that it can be raised without touching argv when debugging a boot
//! that is already failing before argument parsing completes.

use std::env;
use std::fs::OpenOptions;
use std::io::{stderr, Write};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;
use std::fs::File;
use std::sync::Mutex;

static LOGGER: OnceCell<DsLogger> = OnceCell::new();

pub fn init(log_file: Option<PathBuf>) -> Result<()> {
    let level_filter = env::var("DROIDSPACES_LOG")
        .ok()
        .and_then(|s| LevelFilter::from_str(&s).ok())
        .unwrap_or(LevelFilter::Warn);

    let file = match log_file {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?,
        ),
        None => None,
    };

    let logger = LOGGER.get_or_init(|| DsLogger {
        level: level_filter,
        file: Mutex::new(file),
    });
    log::set_logger(logger)
        .map(|()| log::set_max_level(level_filter))
        .expect("logger already installed");

    Ok(())
}

struct DsLogger {
    level: LevelFilter,
    file: Mutex<Option<File>>,
}

impl Log for DsLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = chrono::Local::now().to_rfc3339();
        let line = match (record.level() >= log::Level::Debug, record.file(), record.line()) {
            (true, Some(file), Some(line)) => {
                format!("[{} {} {}:{}] {}", record.level(), now, file, line, record.args())
            }
            _ => format!("[{} {}] {}", record.level(), now, record.args()),
        };

        let mut guard = self.file.lock().unwrap();
        match guard.as_mut() {
            Some(f) => {
                let _ = writeln!(f, "{}", line);
            }
            None => {
                let _ = writeln!(stderr(), "{}", line);
            }
        }
    }

    fn flush(&self) {
        let mut guard = self.file.lock().unwrap();
        match guard.as_mut() {
            Some(f) => {
                let _ = f.flush();
            }
            None => {
                let _ = stderr().flush();
            }
        }
    }
}
