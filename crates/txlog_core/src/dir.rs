//! Log file naming and directory management.
//!
//! Every file of a log is named by appending a suffix to one base path `B`:
//!
//! ```text
//! B.active                        # Active-segment marker (4 bytes)
//! B.lock                          # Advisory lock for single-writer
//! B.1, B.2                        # The two rotating segments
//! B.v<version>                    # Archived segments (keep-logs policy)
//! B.tx_<committed tx id>          # Extraction cache, committed transactions
//! B.ptx_<identifier>              # Extraction cache, prepared transactions
//! B.tmp-<uuid>                    # Write-out before an atomic rename
//! B.<n>_unknown_timestamp_<ms>.log  # Degenerate segment moved aside
//! ```

use crate::error::{LogError, LogResult};
use crate::types::Identifier;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const MARKER_SUFFIX: &str = ".active";
const LOCK_SUFFIX: &str = ".lock";
const ARCHIVE_INFIX: &str = ".v";
const TX_CACHE_INFIX: &str = ".tx_";
const PTX_CACHE_INFIX: &str = ".ptx_";
const TEMP_INFIX: &str = ".tmp-";

/// Paths of every file belonging to one log.
///
/// `LogFiles` itself holds no handles. [`LogFiles::lock`] returns the locked
/// lock file, which the caller keeps alive for as long as it writes the log.
#[derive(Debug, Clone)]
pub struct LogFiles {
    base: PathBuf,
}

impl LogFiles {
    /// Creates the naming scheme for base path `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Returns the base path.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Returns the directory that holds the log files.
    #[must_use]
    pub fn directory(&self) -> PathBuf {
        match self.base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Creates the log directory if needed and takes the exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::LogLocked`] if another process holds the lock.
    pub fn lock(&self) -> LogResult<File> {
        fs::create_dir_all(self.directory())?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(LogError::LogLocked);
        }
        Ok(lock_file)
    }

    /// Path of the active-segment marker.
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.with_suffix(MARKER_SUFFIX)
    }

    /// Path of the lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.with_suffix(LOCK_SUFFIX)
    }

    /// Path of rotating segment `number` (1 or 2).
    #[must_use]
    pub fn segment_path(&self, number: u8) -> PathBuf {
        self.with_suffix(&format!(".{number}"))
    }

    /// Path of the archive for segment version `version`.
    #[must_use]
    pub fn archive_path(&self, version: i64) -> PathBuf {
        self.with_suffix(&format!("{ARCHIVE_INFIX}{version}"))
    }

    /// Path of the extraction cache for a committed transaction.
    #[must_use]
    pub fn tx_cache_path(&self, committed_tx_id: i64) -> PathBuf {
        self.with_suffix(&format!("{TX_CACHE_INFIX}{committed_tx_id}"))
    }

    /// Path of the extraction cache for a prepared transaction.
    #[must_use]
    pub fn ptx_cache_path(&self, identifier: Identifier) -> PathBuf {
        self.with_suffix(&format!("{PTX_CACHE_INFIX}{}", identifier.as_i32()))
    }

    /// Returns a fresh, unique temporary path next to the log files.
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        self.with_suffix(&format!("{TEMP_INFIX}{}", Uuid::new_v4()))
    }

    /// Returns where a degenerate segment is moved aside to.
    #[must_use]
    pub fn moved_aside_path(segment: &Path) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let mut name = segment.as_os_str().to_os_string();
        name.push(format!("_unknown_timestamp_{millis}.log"));
        PathBuf::from(name)
    }

    /// Lists archived segment versions in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn archived_versions(&self) -> LogResult<Vec<i64>> {
        let mut versions: Vec<i64> = self
            .names_with_infix(ARCHIVE_INFIX)?
            .into_iter()
            .filter_map(|rest| rest.parse().ok())
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Lists extraction cache files, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn cache_files(&self) -> LogResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for infix in [TX_CACHE_INFIX, PTX_CACHE_INFIX] {
            for rest in self.names_with_infix(infix)? {
                if rest.parse::<i64>().is_ok() {
                    files.push(self.with_suffix(&format!("{infix}{rest}")));
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Lists the committed tx ids that have an extraction cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn tx_cache_ids(&self) -> LogResult<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .names_with_infix(TX_CACHE_INFIX)?
            .into_iter()
            .filter_map(|rest| rest.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Lists the identifiers that have a prepared-transaction cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn ptx_cache_identifiers(&self) -> LogResult<Vec<Identifier>> {
        let mut ids: Vec<i32> = self
            .names_with_infix(PTX_CACHE_INFIX)?
            .into_iter()
            .filter_map(|rest| rest.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids.into_iter().map(Identifier::new).collect())
    }

    /// Removes `path`; a file that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns any other I/O error.
    pub fn remove_if_exists(path: &Path) -> LogResult<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Writes `data` to `target` via a temp file, fsync and rename.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The temp file is removed on failure.
    pub fn write_atomically(&self, target: &Path, data: &[u8]) -> LogResult<()> {
        let temp = self.temp_path();
        let result = (|| -> LogResult<()> {
            let mut file = File::create(&temp)?;
            file.write_all(data)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp, target)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result?;
        self.sync_directory()
    }

    /// Syncs the log directory so renames and deletions are durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened or synced.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> LogResult<()> {
        let dir = File::open(self.directory())?;
        dir.sync_all()?;
        Ok(())
    }

    /// Syncs the log directory so renames and deletions are durable.
    ///
    /// # Errors
    ///
    /// Never fails on this platform; NTFS journals metadata itself.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> LogResult<()> {
        Ok(())
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self.base.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn names_with_infix(&self, infix: &str) -> LogResult<Vec<String>> {
        let Some(file_name) = self.base.file_name().and_then(|n| n.to_str()) else {
            return Ok(Vec::new());
        };
        let prefix = format!("{file_name}{infix}");

        let dir = self.directory();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(rest) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
            {
                names.push(rest.to_string());
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn names_derive_from_base() {
        let files = LogFiles::new("/data/tx.log");
        assert_eq!(files.marker_path(), PathBuf::from("/data/tx.log.active"));
        assert_eq!(files.segment_path(1), PathBuf::from("/data/tx.log.1"));
        assert_eq!(files.segment_path(2), PathBuf::from("/data/tx.log.2"));
        assert_eq!(files.archive_path(7), PathBuf::from("/data/tx.log.v7"));
        assert_eq!(files.tx_cache_path(42), PathBuf::from("/data/tx.log.tx_42"));
        assert_eq!(
            files.ptx_cache_path(Identifier::new(3)),
            PathBuf::from("/data/tx.log.ptx_3")
        );
        assert_eq!(files.directory(), PathBuf::from("/data"));
    }

    #[test]
    fn temp_paths_are_unique() {
        let files = LogFiles::new("tx.log");
        assert_ne!(files.temp_path(), files.temp_path());
        assert_eq!(files.directory(), PathBuf::from("."));
    }

    #[test]
    fn moved_aside_keeps_segment_name() {
        let moved = LogFiles::moved_aside_path(Path::new("/data/tx.log.1"));
        let name = moved.to_string_lossy().into_owned();
        assert!(name.starts_with("/data/tx.log.1_unknown_timestamp_"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn second_lock_fails() {
        let dir = tempdir().unwrap();
        let files = LogFiles::new(dir.path().join("tx.log"));

        let _held = files.lock().unwrap();
        assert!(matches!(files.lock(), Err(LogError::LogLocked)));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempdir().unwrap();
        let files = LogFiles::new(dir.path().join("nested").join("tx.log"));

        drop(files.lock().unwrap());
        assert!(files.lock().is_ok());
    }

    #[test]
    fn lists_archives_and_caches() {
        let dir = tempdir().unwrap();
        let files = LogFiles::new(dir.path().join("tx.log"));
        for path in [
            files.archive_path(3),
            files.archive_path(1),
            files.tx_cache_path(42),
            files.ptx_cache_path(Identifier::new(9)),
            files.segment_path(1),
            dir.path().join("tx.log.vbogus"),
        ] {
            fs::write(path, b"x").unwrap();
        }

        assert_eq!(files.archived_versions().unwrap(), vec![1, 3]);
        assert_eq!(
            files.cache_files().unwrap(),
            vec![
                files.ptx_cache_path(Identifier::new(9)),
                files.tx_cache_path(42)
            ]
        );
        assert_eq!(files.tx_cache_ids().unwrap(), vec![42]);
        assert_eq!(files.ptx_cache_identifiers().unwrap(), vec![Identifier::new(9)]);
    }

    #[test]
    fn removing_a_missing_file_is_fine() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tx.log.tx_5");
        fs::write(&path, b"x").unwrap();
        LogFiles::remove_if_exists(&path).unwrap();
        assert!(!path.exists());
        LogFiles::remove_if_exists(&path).unwrap();
    }

    #[test]
    fn write_atomically_replaces_target() {
        let dir = tempdir().unwrap();
        let files = LogFiles::new(dir.path().join("tx.log"));
        let target = files.tx_cache_path(1);

        files.write_atomically(&target, b"first").unwrap();
        files.write_atomically(&target, b"second").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"second");
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .contains(".tmp-")
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
