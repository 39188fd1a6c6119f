//! Log configuration.

use crate::collab::RetentionPolicy;

/// Configuration for opening a [`crate::LogicalLog`].
///
/// `Config` is also the stock [`RetentionPolicy`]: it decides whether rotated
/// segments are archived and when rotation triggers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Keep rotated and cleanly closed segments as `<base>.v<version>` archives.
    pub keep_logs: bool,

    /// Rotate automatically before a command write once the segment is large.
    pub auto_rotate: bool,

    /// Segment size in bytes at which rotation is considered.
    pub rotate_at_size: u64,

    /// Fsync on prepare, commit and rotation (safer but slower).
    pub sync_on_force: bool,

    /// Open in backup-slave mode: no local `start()`, foreign streams only.
    pub backup_slave: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keep_logs: false,
            auto_rotate: true,
            rotate_at_size: 10 * 1024 * 1024, // 10 MB
            sync_on_force: true,
            backup_slave: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether old segments are archived instead of deleted.
    #[must_use]
    pub const fn keep_logs(mut self, value: bool) -> Self {
        self.keep_logs = value;
        self
    }

    /// Sets whether rotation triggers automatically.
    #[must_use]
    pub const fn auto_rotate(mut self, value: bool) -> Self {
        self.auto_rotate = value;
        self
    }

    /// Sets the rotation threshold in bytes.
    #[must_use]
    pub const fn rotate_at_size(mut self, size: u64) -> Self {
        self.rotate_at_size = size;
        self
    }

    /// Sets whether forced writes are fsynced.
    #[must_use]
    pub const fn sync_on_force(mut self, value: bool) -> Self {
        self.sync_on_force = value;
        self
    }

    /// Sets whether the log opens as a backup slave.
    #[must_use]
    pub const fn backup_slave(mut self, value: bool) -> Self {
        self.backup_slave = value;
        self
    }
}

impl RetentionPolicy for Config {
    fn keep_logs(&self) -> bool {
        self.keep_logs
    }

    fn auto_rotate(&self) -> bool {
        self.auto_rotate
    }

    fn rotate_at_size(&self) -> u64 {
        self.rotate_at_size
    }
}
