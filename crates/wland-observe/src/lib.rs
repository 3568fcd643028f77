use anyhow::Result;
use chrono::Utc;
use serde_json::{Value, json};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use wland_core::{LogConfig, runtime_dir};

/// Append-only log sink shared by the pipeline components.
#[derive(Debug, Clone)]
pub struct Observer {
    log_path: Option<PathBuf>,
    verbose: bool,
}

impl Observer {
    pub fn new(workspace: &Path, cfg: &LogConfig) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: Some(dir.join(&cfg.file_name)),
            verbose: cfg.verbose,
        })
    }

    /// Observer without a log file; warnings still go to stderr.
    pub fn detached() -> Self {
        Self {
            log_path: None,
            verbose: false,
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Written to the log file; echoed to stderr in verbose mode.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[wland-chat] {msg}");
        }
        let _ = self.append_log_line(&format!("{} DEBUG {msg}", Utc::now().to_rfc3339()));
    }

    pub fn warn_log(&self, msg: &str) {
        eprintln!("[wland-chat WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    /// One structured line per finished exchange.
    pub fn record_exchange(&self, session_id: &str, outcome: &str, fields: Value) {
        let payload = json!({
            "session_id": session_id,
            "outcome": outcome,
            "fields": fields,
        });
        let _ = self.append_log_line(&format!("{} EXCHANGE {payload}", Utc::now().to_rfc3339()));
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        let Some(path) = &self.log_path else {
            return Ok(());
        };
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_warn_and_exchange_lines() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let observer = Observer::new(workspace.path(), &LogConfig::default()).expect("observer");
        observer.warn_log("storage quota exceeded");
        observer.record_exchange("temp_1_x", "replied", json!({"chars": 5}));

        let raw = fs::read_to_string(observer.log_path().expect("path")).expect("log");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("WARN storage quota exceeded"));
        assert!(lines[1].contains("EXCHANGE"));
        assert!(lines[1].contains("\"outcome\":\"replied\""));
    }

    #[test]
    fn detached_observer_never_fails() {
        let observer = Observer::detached();
        observer.verbose_log("nothing to see");
        assert!(observer.log_path().is_none());
    }
}
