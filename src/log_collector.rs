//! Logging pipeline for bootstrap runs.
//!
//! `LogCollector` is the global `log` backend. Records are handed to a
//! background writer thread over an unbounded channel; the thread prints them
//! to the console and appends them to the session log file.
//!
//! ```text
//! log::info!() ... log::error!()
//!     |
//! [LogCollector] (non-blocking send)
//!     |
//! [writer thread] ---> stdout / stderr
//!                 \--> out/logs/<target>-<timestamp>.log
//! ```
//!
//! Lines captured from external tools arrive under the `process` targets and
//! are echoed verbatim.

use chrono::Local;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::system::{PROCESS_STDERR_TARGET, PROCESS_TARGET};

/// Environment variable overriding the log level.
pub const LOG_LEVEL_ENV: &str = "SPARK_LOG";

/// Internal log line or special marker
enum LogMessage {
    /// Regular log line
    Line(LogLine),
    /// Flush marker with channel sender to signal completion
    Flush(std::sync::mpsc::Sender<()>),
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub message: String,
    /// Wall-clock time the record was created
    pub timestamp: String,
}

impl LogLine {
    pub fn new(level: Level, target: &str, message: String) -> Self {
        LogLine {
            level,
            target: target.to_string(),
            message,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    /// Console rendering. Tool output is passed through untouched.
    pub fn console_text(&self) -> String {
        if is_process_target(&self.target) {
            return self.message.clone();
        }
        match self.level {
            Level::Error => format!("error: {}", self.message),
            Level::Warn => format!("warning: {}", self.message),
            Level::Info => self.message.clone(),
            Level::Debug | Level::Trace => format!("[{}] {}", self.level, self.message),
        }
    }

    /// Session file rendering.
    pub fn file_text(&self) -> String {
        format!(
            "[{}] [{:<5}] [{}] {}",
            self.timestamp, self.level, self.target, self.message
        )
    }

    fn to_stderr(&self) -> bool {
        self.target == PROCESS_STDERR_TARGET
            || (!is_process_target(&self.target) && self.level <= Level::Warn)
    }
}

fn is_process_target(target: &str) -> bool {
    target == PROCESS_TARGET || target == PROCESS_STDERR_TARGET
}

/// Console + file logger backed by a writer thread.
pub struct LogCollector {
    /// Channel sender for log lines (internal)
    tx: Sender<LogMessage>,
    level: LevelFilter,
    /// Session log file, if one could be created
    log_file: Option<PathBuf>,
}

impl LogCollector {
    /// Create a collector writing to the console and, when given, to `log_file`.
    pub fn new(log_file: Option<PathBuf>, level: LevelFilter) -> Result<Self, String> {
        let file = match &log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| format!("Failed to create log directory: {}", e))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };

        let (tx, rx) = unbounded::<LogMessage>();
        std::thread::spawn(move || writer_loop(rx, file));

        Ok(LogCollector {
            tx,
            level,
            log_file,
        })
    }

    /// Path of the session log, if file logging is active.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Register this collector as the global `log` backend.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self)).map(|()| log::set_max_level(level))
    }

    /// Block until every line sent so far has been written.
    pub fn wait_for_empty(&self) {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        if self.tx.send(LogMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = LogLine::new(record.level(), record.target(), record.args().to_string());
        if self.tx.send(LogMessage::Line(line.clone())).is_err() {
            // Writer thread gone; keep the message visible.
            eprintln!("{}", line.console_text());
        }
    }

    fn flush(&self) {
        self.wait_for_empty();
    }
}

fn writer_loop(rx: Receiver<LogMessage>, mut file: Option<BufWriter<File>>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            LogMessage::Line(line) => {
                if line.to_stderr() {
                    eprintln!("{}", line.console_text());
                } else {
                    println!("{}", line.console_text());
                }
                if let Some(writer) = file.as_mut() {
                    if writeln!(writer, "{}", line.file_text()).is_err() {
                        eprintln!("[Log] Failed to write session log; file logging disabled");
                        file = None;
                    }
                }
            }
            LogMessage::Flush(done) => {
                if let Some(writer) = file.as_mut() {
                    let _ = writer.flush();
                }
                let _ = std::io::stdout().flush();
                let _ = done.send(());
            }
        }
    }
}

/// Session log path: `<log_dir>/<target>-<YYYYmmdd-HHMMSS>.log`.
pub fn session_log_path(log_dir: &Path, target: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    log_dir.join(format!("{}-{}.log", target, stamp))
}

/// Level from `SPARK_LOG`, defaulting to `Info`.
pub fn level_from_env() -> LevelFilter {
    std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}
