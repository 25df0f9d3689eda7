use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use log::warn;
use tokio::sync::mpsc::UnboundedSender;

use crate::convert::RunSummary;

/// Messages a worker sends to its controlling context. Workers never touch
/// front-end state directly; everything crosses this channel.
#[derive(Debug, Clone)]
pub enum Event {
    /// One orchestration event, already timestamped into the log file
    Log(String),
    /// Raw external-tool output, appended to the log file verbatim
    LogRaw(String),
    /// Queue position after a task finished
    Progress { index: usize, total: usize },
    /// The conversion run finished
    Done(RunSummary),
}

/// Log sink: appends to the session log file and mirrors everything to the
/// event channel. Cloneable so short-lived workers can share it.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: UnboundedSender<Event>,
    log_file: PathBuf,
}

fn nowstamp() -> String {
    Local::now().format("[%Y-%m-%d %H:%M:%S]").to_string()
}

impl Reporter {
    pub fn new(tx: UnboundedSender<Event>, log_file: PathBuf) -> Self {
        Self { tx, log_file }
    }

    /// A single orchestration event line
    pub fn line(&self, msg: &str) {
        self.append(&format!("{} {}\n", nowstamp(), msg));
        let _ = self.tx.send(Event::Log(msg.to_string()));
    }

    /// Raw output chunk; already carries its own newlines, no timestamp
    pub fn raw(&self, chunk: &str) {
        self.append(chunk);
        let _ = self.tx.send(Event::LogRaw(chunk.to_string()));
    }

    pub fn progress(&self, index: usize, total: usize) {
        let _ = self.tx.send(Event::Progress { index, total });
    }

    pub fn done(&self, summary: RunSummary) {
        let _ = self.tx.send(Event::Done(summary));
    }

    /// Bracket lines marking a session in the log file
    pub fn session_header(&self, label: &str) {
        self.append(&format!("\n=== {} started: {} ===\n", label, nowstamp()));
    }

    pub fn session_footer(&self, label: &str) {
        self.append(&format!("=== {} ended: {} ===\n", label, nowstamp()));
    }

    /// A sink-write failure never takes a run down
    fn append(&self, text: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .and_then(|mut f| f.write_all(text.as_bytes()));
        if let Err(e) = result {
            warn!("Failed to append to log {}: {e}", self.log_file.display());
        }
    }
}
