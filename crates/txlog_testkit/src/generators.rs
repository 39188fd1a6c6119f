//! Property-based test generators using proptest.
//!
//! Provides strategies for log entries and for scripts of transactions that
//! can be played against a [`TestLog`].

use crate::fixtures::TestLog;
use proptest::prelude::*;
use txlog_core::{
    CommitIdAllocator, CommitKind, DistributedTxId, Identifier, LogEntry, MAX_XID_PART_LEN,
};

/// Strategy for valid distributed transaction ids, up to the longest parts
/// the format allows.
pub fn xid_strategy() -> impl Strategy<Value = DistributedTxId> {
    (
        prop::collection::vec(any::<u8>(), 0..=MAX_XID_PART_LEN),
        prop::collection::vec(any::<u8>(), 0..=MAX_XID_PART_LEN),
        any::<i32>(),
    )
        .prop_map(|(global, branch, format)| {
            DistributedTxId::new(global, branch, format).expect("Parts are within bounds")
        })
}

/// Strategy for positive identifiers.
pub fn identifier_strategy() -> impl Strategy<Value = Identifier> {
    (1..=i32::MAX).prop_map(Identifier::new)
}

/// Strategy for command payloads (arbitrary bytes).
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for any single log entry.
///
/// `Start` entries carry a zero `start_offset`; decoding fills in the real one.
pub fn entry_strategy() -> impl Strategy<Value = LogEntry> {
    prop_oneof![
        (xid_strategy(), identifier_strategy()).prop_map(|(xid, identifier)| LogEntry::Start {
            xid,
            identifier,
            start_offset: 0,
        }),
        identifier_strategy().prop_map(|identifier| LogEntry::Prepare { identifier }),
        (identifier_strategy(), payload_strategy())
            .prop_map(|(identifier, payload)| LogEntry::Command { identifier, payload }),
        identifier_strategy().prop_map(|identifier| LogEntry::Done { identifier }),
        (identifier_strategy(), any::<i64>()).prop_map(|(identifier, tx)| LogEntry::commit(
            CommitKind::OnePhase,
            identifier,
            tx
        )),
        (identifier_strategy(), any::<i64>()).prop_map(|(identifier, tx)| LogEntry::commit(
            CommitKind::TwoPhase,
            identifier,
            tx
        )),
    ]
}

/// How far a scripted transaction gets before the log is crashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Started, commands written, nothing else.
    Open,
    /// Prepared but no decision.
    Prepared,
    /// Committed one-phase, no `Done`.
    CommittedOnePhase,
    /// Prepared and committed two-phase, no `Done`.
    CommittedTwoPhase,
    /// Committed and finished.
    Finished,
}

impl Outcome {
    /// Returns true if the transaction is still active after its script.
    pub fn is_active(self) -> bool {
        self != Self::Finished
    }
}

/// One transaction in a script.
#[derive(Debug, Clone)]
pub struct ScriptedTx {
    /// Command payloads, written in order.
    pub payloads: Vec<Vec<u8>>,
    /// Where the transaction stops.
    pub outcome: Outcome,
}

/// Strategy for a single scripted transaction.
pub fn scripted_tx_strategy() -> impl Strategy<Value = ScriptedTx> {
    (
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..4),
        prop_oneof![
            Just(Outcome::Open),
            Just(Outcome::Prepared),
            Just(Outcome::CommittedOnePhase),
            Just(Outcome::CommittedTwoPhase),
            Just(Outcome::Finished),
        ],
    )
        .prop_map(|(payloads, outcome)| ScriptedTx { payloads, outcome })
}

/// Strategy for a script of up to `max` transactions.
pub fn script_strategy(max: usize) -> impl Strategy<Value = Vec<ScriptedTx>> {
    prop::collection::vec(scripted_tx_strategy(), 1..=max)
}

/// Plays `script` against `log`, interleaving transactions: every
/// transaction is started first, then commands are written round-robin,
/// then each is taken to its outcome. Committed ids count up from the
/// engine's last committed tx.
///
/// Returns the identifiers of transactions expected to be active.
pub fn run_script(log: &TestLog, script: &[ScriptedTx]) -> Vec<Identifier> {
    let ids: Vec<Identifier> = script
        .iter()
        .enumerate()
        .map(|(n, _)| log.start(&crate::fixtures::xid(n as u32)).expect("Failed to start"))
        .collect();

    let rounds = script.iter().map(|tx| tx.payloads.len()).max().unwrap_or(0);
    for round in 0..rounds {
        for (tx, id) in script.iter().zip(&ids) {
            if let Some(payload) = tx.payloads.get(round) {
                log.write_command(*id, payload).expect("Failed to write command");
            }
        }
    }

    let mut next_tx = log.engine().last_committed_tx() + 1;
    let mut active = Vec::new();
    for (tx, id) in script.iter().zip(&ids) {
        match tx.outcome {
            Outcome::Open => {}
            Outcome::Prepared => log.prepare(*id).expect("Failed to prepare"),
            Outcome::CommittedOnePhase | Outcome::Finished => {
                log.commit_one_phase(*id, next_tx).expect("Failed to commit");
                next_tx += 1;
            }
            Outcome::CommittedTwoPhase => {
                log.prepare(*id).expect("Failed to prepare");
                log.commit_two_phase(*id, next_tx).expect("Failed to commit");
                next_tx += 1;
            }
        }
        if tx.outcome == Outcome::Finished {
            log.done(*id).expect("Failed to finish");
        }
        if tx.outcome.is_active() {
            active.push(*id);
        }
    }
    log.engine().set_last_committed_tx(next_tx - 1);
    active
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_xids_are_within_bounds(xid in xid_strategy()) {
            prop_assert!(xid.global_id().len() <= MAX_XID_PART_LEN);
            prop_assert!(xid.branch_id().len() <= MAX_XID_PART_LEN);
        }

        #[test]
        fn generated_identifiers_are_positive(id in identifier_strategy()) {
            prop_assert!(id.as_i32() > 0);
        }
    }

    #[test]
    fn script_reports_active_transactions() {
        let log = TestLog::new();
        let script = vec![
            ScriptedTx {
                payloads: vec![b"a".to_vec()],
                outcome: Outcome::Finished,
            },
            ScriptedTx {
                payloads: vec![b"b".to_vec(), b"c".to_vec()],
                outcome: Outcome::Prepared,
            },
        ];

        let active = run_script(&log, &script);
        assert_eq!(active, vec![Identifier::new(2)]);
        assert_eq!(log.active_transactions().len(), 1);
    }
}
