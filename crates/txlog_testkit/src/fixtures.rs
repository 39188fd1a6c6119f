//! Test fixtures and log helpers.
//!
//! Provides a transaction log in a temporary directory that tests can crash
//! (drop without closing) and reopen against the same engine.

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use txlog_core::{
    Collaborators, Config, DistributedTxId, Identifier, InMemoryEngine, LogFiles, LogResult,
    LogicalLog,
};

/// Builds a small distributed transaction id that differs per `n`.
pub fn xid(n: u32) -> DistributedTxId {
    DistributedTxId::new(n.to_be_bytes().to_vec(), vec![0xb0], 0x4e4f)
        .expect("Fixed-size xid parts are valid")
}

/// A transaction log with automatic cleanup.
pub struct TestLog {
    /// The open log, `None` between a crash or close and the next reopen.
    log: Option<LogicalLog>,
    engine: Arc<InMemoryEngine>,
    config: Config,
    /// The temporary directory (kept alive to prevent cleanup).
    dir: TempDir,
}

impl TestLog {
    /// Opens a log with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Opens a log with `config`.
    pub fn with_config(config: Config) -> Self {
        Self::with_engine(config, Arc::new(InMemoryEngine::new()))
    }

    /// Opens a log with `config` wired to `engine`.
    pub fn with_engine(config: Config, engine: Arc<InMemoryEngine>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let mut test_log = Self {
            log: None,
            engine,
            config,
            dir,
        };
        test_log.reopen().expect("Failed to open log");
        test_log
    }

    /// Base path of the log files.
    pub fn base(&self) -> PathBuf {
        self.dir.path().join("tx.log")
    }

    /// File naming for this log.
    pub fn files(&self) -> LogFiles {
        LogFiles::new(self.base())
    }

    /// The engine behind every collaborator role.
    pub fn engine(&self) -> &Arc<InMemoryEngine> {
        &self.engine
    }

    /// The configuration the log is opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns true while a log is open.
    pub fn is_open(&self) -> bool {
        self.log.is_some()
    }

    /// Drops the log without closing it, as if the process died. Everything
    /// written so far stays on disk; the marker keeps naming the segment.
    pub fn crash(&mut self) {
        self.log = None;
    }

    /// Closes the log cleanly.
    pub fn close(&mut self) -> LogResult<()> {
        match self.log.take() {
            Some(log) => log.close(),
            None => Ok(()),
        }
    }

    /// Crashes the current log, if any, and opens it again with the same
    /// engine.
    pub fn reopen(&mut self) -> LogResult<()> {
        let engine = self.engine.clone();
        self.reopen_with(engine)
    }

    /// Crashes the current log, if any, and opens it again with `engine`.
    pub fn reopen_with(&mut self, engine: Arc<InMemoryEngine>) -> LogResult<()> {
        self.log = None;
        self.engine = engine;
        let collab = Collaborators::in_memory(self.engine.clone(), &self.config);
        self.log = Some(LogicalLog::open(self.base(), self.config.clone(), collab)?);
        Ok(())
    }

    /// Starts, fills, commits (one-phase) and finishes one transaction, and
    /// tells the engine it committed.
    pub fn commit_transaction(
        &self,
        xid: &DistributedTxId,
        payloads: &[&[u8]],
        committed_tx_id: i64,
    ) -> Identifier {
        let id = self.start(xid).expect("Failed to start");
        for payload in payloads {
            self.write_command(id, payload).expect("Failed to write command");
        }
        self.commit_one_phase(id, committed_tx_id)
            .expect("Failed to commit");
        self.done(id).expect("Failed to finish");
        self.engine.set_last_committed_tx(committed_tx_id);
        id
    }
}

impl Default for TestLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestLog {
    type Target = LogicalLog;

    fn deref(&self) -> &Self::Target {
        self.log.as_ref().expect("Log is not open")
    }
}
