//! Segment rotation end to end.

use std::fs;
use std::sync::Arc;
use txlog_core::{
    Config, Identifier, InMemoryEngine, LogEntry, LogOwner, MarkerState, PositionedEntry,
    SegmentHeader,
};
use txlog_storage::FileBackend;
use txlog_testkit::prelude::*;

fn header_of(path: &std::path::Path) -> SegmentHeader {
    SegmentHeader::read_from(&FileBackend::open_read_only(path).unwrap()).unwrap()
}

/// Entries with `Start` offsets zeroed, so segments can be compared.
fn normalized(entries: Vec<PositionedEntry>) -> Vec<LogEntry> {
    entries
        .into_iter()
        .map(|positioned| match positioned.entry {
            LogEntry::Start {
                xid, identifier, ..
            } => LogEntry::Start {
                xid,
                identifier,
                start_offset: 0,
            },
            other => other,
        })
        .collect()
}

/// Four interleaved transactions; the first and third stay active.
fn mixed(log: &TestLog) -> Vec<Identifier> {
    let ids: Vec<Identifier> = (1..=4).map(|n| log.start(&xid(n)).unwrap()).collect();
    for (n, id) in ids.iter().enumerate() {
        log.write_command(*id, &[n as u8; 24]).unwrap();
    }
    log.commit_one_phase(ids[1], 1).unwrap();
    log.write_command(ids[0], b"late").unwrap();
    log.done(ids[1]).unwrap();
    log.prepare(ids[2]).unwrap();
    log.commit_one_phase(ids[3], 2).unwrap();
    log.done(ids[3]).unwrap();
    log.engine().set_last_committed_tx(2);
    vec![ids[0], ids[2]]
}

#[test]
fn rotation_carries_exactly_the_active_entries() {
    let log = TestLog::with_config(Config::default().keep_logs(true));
    let active = mixed(&log);

    log.rotate().unwrap();

    let files = log.files();
    let archive = files.archive_path(0);
    let segment = files.segment_path(2);
    assert_eq!(log.current_segment_path().unwrap(), segment);
    assert_eq!(log.marker_state(), Some(MarkerState::Segment2));
    assert!(!files.segment_path(1).exists());
    assert_eq!(header_of(&archive), SegmentHeader::new(0, 0));
    assert_eq!(header_of(&segment), SegmentHeader::new(1, 2));

    let expected: Vec<LogEntry> = normalized(read_segment(&archive).unwrap())
        .into_iter()
        .filter(|entry| active.contains(&entry.identifier()))
        .collect();
    let carried = read_segment(&segment).unwrap();
    assert_eq!(carried[0].offset, SegmentHeader::SIZE as u64);
    assert_eq!(normalized(carried), expected);
    assert_eq!(
        log.active_transactions(),
        vec![(active[0], xid(1)), (active[1], xid(3))]
    );
}

#[test]
fn crash_after_rotation_recovers_from_new_segment() {
    let mut log = TestLog::with_config(Config::default().keep_logs(true));
    let active = mixed(&log);
    log.rotate().unwrap();
    log.write_command(active[0], b"after").unwrap();
    log.crash();

    log.reopen_with(Arc::new(InMemoryEngine::with_state(1, 2)))
        .unwrap();
    let engine = log.engine();
    assert_eq!(
        log.active_transactions(),
        vec![(active[0], xid(1)), (active[1], xid(3))]
    );
    assert_eq!(
        engine.commands_of(&xid(1)),
        vec![vec![0u8; 24], b"late".to_vec(), b"after".to_vec()]
    );
    assert!(log.files().archive_path(0).exists());
}

#[test]
fn failed_rotation_keeps_writing_the_old_segment() {
    let mut log = TestLog::new();
    let active = mixed(&log);
    let marker = log.files().marker_path();
    fs::remove_file(&marker).unwrap();
    fs::create_dir(&marker).unwrap();

    assert!(log.rotate().is_err());
    assert!(!log.files().segment_path(2).exists());
    assert_eq!(log.engine().current_log_version(), 0);

    fs::remove_dir(&marker).unwrap();
    fs::write(&marker, MarkerState::Segment1.encode()).unwrap();
    log.write_command(active[0], b"after").unwrap();
    log.crash();

    log.reopen_with(Arc::new(InMemoryEngine::with_state(0, 2)))
        .unwrap();
    assert_eq!(
        log.active_transactions(),
        vec![(active[0], xid(1)), (active[1], xid(3))]
    );
    assert_eq!(
        log.engine().commands_of(&xid(1)),
        vec![vec![0u8; 24], b"late".to_vec(), b"after".to_vec()]
    );

    log.rotate().unwrap();
    assert_eq!(log.marker_state(), Some(MarkerState::Segment2));
    assert_eq!(log.engine().current_log_version(), 1);
}

#[test]
fn stale_other_segment_is_removed_on_open() {
    let mut log = TestLog::new();
    let id = log.start(&xid(1)).unwrap();
    log.crash();

    let stale = log.files().segment_path(2);
    fs::write(&stale, [7u8; 40]).unwrap();

    log.reopen().unwrap();
    assert!(!stale.exists());
    assert_eq!(log.active_transactions(), vec![(id, xid(1))]);
}

#[test]
fn automatic_rotation_archives_every_version() {
    let config = Config::default().keep_logs(true).rotate_at_size(256);
    let mut log = TestLog::with_config(config);
    for n in 1..=20u32 {
        log.commit_transaction(&xid(n), &[&[n as u8; 64][..], &[0u8; 8][..]], i64::from(n));
    }

    let versions = log.files().archived_versions().unwrap();
    assert!(!versions.is_empty());
    assert_eq!(log.engine().current_log_version(), versions.len() as i64);
    for version in &versions {
        assert_eq!(header_of(&log.files().archive_path(*version)).version, *version);
    }

    log.crash();
    log.reopen().unwrap();
    assert!(log.active_transactions().is_empty());
}
