//! Full log lifecycle: open, commit, close, reopen, and master to slave
//! shipping.

use txlog_core::{
    CommitIdAllocator, CommitKind, Config, LogEntry, LogError, LogOwner, LogicalLog, MarkerState,
    SegmentHeader,
};
use txlog_storage::FileBackend;
use txlog_testkit::prelude::*;

fn current_header(log: &TestLog) -> SegmentHeader {
    let path = log.current_segment_path().unwrap();
    SegmentHeader::read_from(&FileBackend::open_read_only(&path).unwrap()).unwrap()
}

#[test]
fn commit_close_reopen_rotate() {
    let mut log = TestLog::new();
    let id = log.start(&xid(1)).unwrap();
    log.write_command(id, b"a").unwrap();
    log.commit_one_phase(id, 42).unwrap();
    log.done(id).unwrap();
    // The commit id allocator owns the last committed tx, not the log.
    log.engine().set_last_committed_tx(42);

    log.close().unwrap();
    assert!(!log.files().segment_path(1).exists());

    log.reopen().unwrap();
    assert!(log.active_transactions().is_empty());
    assert_eq!(log.marker_state(), Some(MarkerState::Segment1));
    assert_eq!(current_header(&log), SegmentHeader::new(0, 42));

    log.rotate().unwrap();
    assert_eq!(
        log.current_segment_path().unwrap(),
        log.files().segment_path(2)
    );
    assert_eq!(current_header(&log), SegmentHeader::new(1, 42));
}

#[test]
fn clean_close_with_keep_logs_archives_the_segment() {
    let mut log = TestLog::with_config(Config::default().keep_logs(true));
    log.commit_transaction(&xid(1), &[b"a"], 1);
    log.close().unwrap();

    assert!(log.files().archive_path(0).exists());
    assert_eq!(log.engine().current_log_version(), 1);
    assert_eq!(read_segment(&log.files().archive_path(0)).unwrap().len(), 4);

    log.reopen().unwrap();
    assert_eq!(current_header(&log), SegmentHeader::new(1, 1));
    assert!(log.has_logical_log(0));
    assert!(!log.has_logical_log(1));
}

#[test]
fn close_with_active_transactions_defers_to_recovery() {
    let mut log = TestLog::new();
    let id = log.start(&xid(1)).unwrap();
    log.write_command(id, b"a").unwrap();
    log.close().unwrap();

    assert_eq!(
        txlog_core::segment::ActiveSegmentMarker::read(&log.files().marker_path()).unwrap(),
        Some(MarkerState::Segment1)
    );
    log.reopen().unwrap();
    assert_eq!(log.active_transactions(), vec![(id, xid(1))]);
}

#[test]
fn operations_after_close_fail() {
    let log = TestLog::new();
    LogicalLog::close(&log).unwrap();
    assert!(!LogicalLog::is_open(&log));
    assert!(matches!(log.start(&xid(1)), Err(LogError::LogClosed)));
    assert!(matches!(log.rotate(), Err(LogError::LogClosed)));
}

#[test]
fn backup_slave_mode_rules() {
    let log = TestLog::new();
    let id = log.start(&xid(1)).unwrap();
    assert!(matches!(
        log.make_backup_slave(),
        Err(LogError::PolicyViolation { .. })
    ));

    log.commit_one_phase(id, 1).unwrap();
    log.done(id).unwrap();
    log.make_backup_slave().unwrap();
    assert!(log.is_backup_slave());
    assert!(matches!(
        log.start(&xid(2)),
        Err(LogError::PolicyViolation { .. })
    ));
}

#[test]
fn master_ships_segments_and_transactions_to_slave() {
    let master = TestLog::with_config(Config::default().keep_logs(true));
    master.commit_transaction(&xid(1), &[b"m1"], 1);
    master.commit_transaction(&xid(2), &[b"m2", b"m2b"], 2);
    master.rotate().unwrap();
    master.commit_transaction(&xid(3), &[b"m3"], 3);

    let mut slave = TestLog::with_config(Config::default().backup_slave(true));
    let mut archive = master.open_logical_log(0).unwrap();
    slave.apply_segment(&mut archive).unwrap();

    let engine = slave.engine().clone();
    assert_eq!(engine.applied_commits(), vec![(xid(1), 1), (xid(2), 2)]);
    assert_eq!(engine.current_log_version(), 1);
    assert_eq!(engine.last_committed_tx(), 2);

    let stream = master.extract_by_tx_id(3).unwrap();
    slave
        .apply_single_transaction(&mut stream.as_slice(), 3)
        .unwrap();
    assert_eq!(engine.last_committed_tx(), 3);
    assert_eq!(engine.applied_commits().last(), Some(&(xid(3), 3)));
    assert!(engine.pruned().contains(&xid(3)));

    let local = read_segment(&slave.current_segment_path().unwrap()).unwrap();
    let identifier = local[0].entry.identifier();
    assert_eq!(local.len(), 4);
    assert_eq!(
        local[2].entry,
        LogEntry::commit(CommitKind::OnePhase, identifier, 3)
    );
    assert_eq!(local[3].entry, LogEntry::Done { identifier });

    // The slave's segment now carries the applied version and survives a crash.
    assert_eq!(current_header(&slave), SegmentHeader::new(1, 2));
    slave.crash();
    slave.reopen().unwrap();
    assert!(slave.active_transactions().is_empty());

    let err = slave
        .apply_single_transaction(&mut stream.as_slice(), 3)
        .unwrap_err();
    assert!(matches!(
        err,
        LogError::UnexpectedCommitId {
            expected: 4,
            actual: 3
        }
    ));
}
