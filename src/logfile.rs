//! Optional plain-text file log under `.rinne/logs/`.
//!
//! One UTC-timestamped line per event, append-only, one file per day.
//! Logging failures are swallowed: the log is an aid, never a dependency.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use chrono::Utc;

use crate::layout::RepoLayout;

/// Handle to the (possibly disabled) engine log.
#[derive(Debug)]
pub struct FileLog {
    sink: Option<Mutex<std::fs::File>>,
}

impl FileLog {
    /// Opens today's log file for appending, or returns a disabled logger.
    pub fn open(layout: &RepoLayout, enabled: bool) -> FileLog {
        if !enabled {
            return FileLog { sink: None };
        }
        let dir = layout.logs_dir();
        let sink = std::fs::create_dir_all(&dir)
            .ok()
            .and_then(|_| {
                let name = format!("rinne-{}.log", Utc::now().format("%Y%m%d"));
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(dir.join(name))
                    .ok()
            })
            .map(Mutex::new);
        FileLog { sink }
    }

    /// A logger that records nothing.
    pub fn disabled() -> FileLog {
        FileLog { sink: None }
    }

    /// Appends one event line.
    pub fn line(&self, message: &str) {
        if let Some(sink) = &self.sink {
            if let Ok(mut file) = sink.lock() {
                let _ = writeln!(file, "{} {message}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"));
            }
        }
    }
}
