//! Three-stage per-leader mempool (spec.md §4.4): `raw -> processing -> tx`,
//! plus a `lockedUtxo` set shared across all leaders. All mutations run
//! under one `std::sync::Mutex` so the cross-cutting invariants — a
//! rawTxId in exactly one stage, `lockedUtxo` exactly the union of
//! in-flight locks — hold at every observation point; §5 lists these
//! operations as non-suspending, so a blocking mutex (not `tokio::sync`)
//! is the right tool.

use crate::error::{XmblError, XmblResult};
use crate::types::{Transaction, TxHash, Timestamp, UtxoRef};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct ProcessingEntry {
    tx: Transaction,
    validations: HashSet<String>,
    locked_utxos: HashSet<UtxoRef>,
    entered_at: Timestamp,
}

#[derive(Default)]
struct LeaderQueues {
    raw_order: Vec<TxHash>,
    raw: HashMap<TxHash, (Transaction, Timestamp)>,
    processing: HashMap<TxHash, ProcessingEntry>,
    finalized: HashMap<TxHash, Transaction>,
}

#[derive(Default)]
struct MempoolState {
    leaders: HashMap<String, LeaderQueues>,
    locked_utxo: HashSet<UtxoRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MempoolStats {
    pub raw: usize,
    pub processing: usize,
    pub tx: usize,
}

/// Evicted/reset raw-tx ids surfaced by a TTL sweep, for event emission.
pub struct TtlSweepResult {
    pub expired_raw: Vec<(String, TxHash)>,
    pub reset_processing: Vec<(String, TxHash)>,
}

pub struct Mempool {
    state: Mutex<MempoolState>,
    required_validations: u32,
}

impl Mempool {
    pub fn new(required_validations: u32) -> Self {
        Self {
            state: Mutex::new(MempoolState::default()),
            required_validations,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MempoolState> {
        self.state.lock().expect("mempool lock poisoned")
    }

    /// Idempotent: a second submission of the same signed transaction
    /// returns the existing rawTxId rather than erroring.
    pub fn submit_raw(&self, leader: &str, tx: Transaction, now: Timestamp) -> XmblResult<TxHash> {
        let raw_id = tx.raw_tx_id();
        let mut state = self.lock();

        if let Some(q) = state.leaders.get(leader) {
            if q.raw.contains_key(&raw_id)
                || q.processing.contains_key(&raw_id)
                || q.finalized.contains_key(&raw_id)
            {
                return Ok(raw_id);
            }
        }

        if tx.body().inputs.iter().any(|i| state.locked_utxo.contains(i)) {
            return Err(XmblError::InputsLocked);
        }

        let q = state.leaders.entry(leader.to_string()).or_default();
        q.raw_order.push(raw_id.clone());
        q.raw.insert(raw_id.clone(), (tx, now));
        Ok(raw_id)
    }

    pub fn begin_processing(&self, leader: &str, raw_id: &str, validator_id: &str, now: Timestamp) -> XmblResult<()> {
        let mut state = self.lock();

        if state
            .leaders
            .get(leader)
            .map(|q| q.processing.contains_key(raw_id) || q.finalized.contains_key(raw_id))
            .unwrap_or(false)
        {
            return Ok(());
        }

        let (tx, _) = {
            let q = state
                .leaders
                .get_mut(leader)
                .ok_or_else(|| XmblError::NotFound(format!("leader {leader}")))?;
            q.raw
                .remove(raw_id)
                .ok_or_else(|| XmblError::NotFound(format!("rawTxId {raw_id}")))?
        };

        if tx.body().inputs.iter().any(|i| state.locked_utxo.contains(i)) {
            let q = state.leaders.get_mut(leader).unwrap();
            q.raw.insert(raw_id.to_string(), (tx, now));
            return Err(XmblError::InputsLocked);
        }

        let locked: HashSet<UtxoRef> = tx.body().inputs.iter().cloned().collect();
        for i in &locked {
            state.locked_utxo.insert(i.clone());
        }

        let mut validations = HashSet::new();
        validations.insert(validator_id.to_string());

        let q = state.leaders.get_mut(leader).unwrap();
        q.raw_order.retain(|id| id != raw_id);
        q.processing.insert(
            raw_id.to_string(),
            ProcessingEntry {
                tx,
                validations,
                locked_utxos: locked,
                entered_at: now,
            },
        );
        Ok(())
    }

    pub fn validate(&self, leader: &str, raw_id: &str, validator_id: &str) -> XmblResult<()> {
        let mut state = self.lock();
        let q = state
            .leaders
            .get_mut(leader)
            .ok_or_else(|| XmblError::NotFound(format!("leader {leader}")))?;
        let entry = q
            .processing
            .get_mut(raw_id)
            .ok_or_else(|| XmblError::InvalidState(format!("{raw_id} is not in processing")))?;
        entry.validations.insert(validator_id.to_string());
        Ok(())
    }

    pub fn finalize(&self, leader: &str, raw_id: &str) -> XmblResult<Transaction> {
        let mut state = self.lock();

        if let Some(q) = state.leaders.get(leader) {
            if q.finalized.contains_key(raw_id) {
                return Err(XmblError::AlreadyFinalized(raw_id.to_string()));
            }
        }

        let q = state
            .leaders
            .get_mut(leader)
            .ok_or_else(|| XmblError::NotFound(format!("leader {leader}")))?;
        let entry = q
            .processing
            .get(raw_id)
            .ok_or_else(|| XmblError::InvalidState(format!("{raw_id} is not in processing")))?;

        if entry.validations.len() < self.required_validations as usize {
            return Err(XmblError::InsufficientValidations {
                have: entry.validations.len(),
                need: self.required_validations as usize,
            });
        }

        let entry = q.processing.remove(raw_id).unwrap();
        for i in &entry.locked_utxos {
            state.locked_utxo.remove(i);
        }
        let q = state.leaders.get_mut(leader).unwrap();
        q.finalized.insert(raw_id.to_string(), entry.tx.clone());
        Ok(entry.tx)
    }

    pub fn stats(&self) -> MempoolStats {
        let state = self.lock();
        state.leaders.values().fold(MempoolStats::default(), |mut acc, q| {
            acc.raw += q.raw.len();
            acc.processing += q.processing.len();
            acc.tx += q.finalized.len();
            acc
        })
    }

    /// Evicts raw entries older than `raw_ttl_ms` and rolls back processing
    /// entries older than `processing_ttl_ms`, per §5 "Timeouts".
    pub fn sweep_ttls(&self, now: Timestamp, raw_ttl_ms: u64, processing_ttl_ms: u64) -> TtlSweepResult {
        let mut state = self.lock();
        let mut expired_raw = Vec::new();
        let mut reset_processing = Vec::new();

        for (leader, q) in state.leaders.iter_mut() {
            let expired_ids: Vec<TxHash> = q
                .raw
                .iter()
                .filter(|(_, (_, submitted_at))| now.saturating_sub(*submitted_at) > raw_ttl_ms)
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired_ids {
                q.raw.remove(&id);
                q.raw_order.retain(|x| x != &id);
                expired_raw.push((leader.clone(), id));
            }

            let reset_ids: Vec<TxHash> = q
                .processing
                .iter()
                .filter(|(_, entry)| now.saturating_sub(entry.entered_at) > processing_ttl_ms)
                .map(|(id, _)| id.clone())
                .collect();
            for id in reset_ids {
                let entry = q.processing.remove(&id).unwrap();
                for utxo in &entry.locked_utxos {
                    state.locked_utxo.remove(utxo);
                }
                q.raw_order.push(id.clone());
                q.raw.insert(id.clone(), (entry.tx, now));
                reset_processing.push((leader.clone(), id));
            }
        }

        TtlSweepResult {
            expired_raw,
            reset_processing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Output, TxBody};

    fn tx(from: &str, inputs: Vec<UtxoRef>) -> Transaction {
        Transaction::Utxo(TxBody {
            from: from.to_string(),
            to: "xmb_recipient".to_string(),
            amount: 10,
            fee: 1,
            stake: 0,
            timestamp: 0,
            inputs,
            outputs: vec![Output {
                address: "xmb_recipient".to_string(),
                amount: 10,
            }],
            payload: None,
            sig: None,
        })
    }

    #[test]
    fn submit_raw_is_idempotent() {
        let mempool = Mempool::new(3);
        let t = tx("xmb_a", vec![]);
        let id1 = mempool.submit_raw("leader1", t.clone(), 0).unwrap();
        let id2 = mempool.submit_raw("leader1", t, 0).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(mempool.stats().raw, 1);
    }

    #[test]
    fn begin_processing_locks_inputs_and_second_submitter_observes_inputs_locked() {
        let mempool = Mempool::new(1);
        let shared_input = UtxoRef {
            tx_id: "parent".into(),
            output_index: 0,
        };
        let t1 = tx("xmb_a", vec![shared_input.clone()]);
        let t2 = tx("xmb_b", vec![shared_input]);

        let id1 = mempool.submit_raw("leader1", t1, 0).unwrap();
        let id2 = mempool.submit_raw("leader1", t2, 0).unwrap();

        mempool.begin_processing("leader1", &id1, "v1", 0).unwrap();
        let result = mempool.begin_processing("leader1", &id2, "v1", 0);
        assert!(matches!(result, Err(XmblError::InputsLocked)));
    }

    #[test]
    fn finalize_requires_threshold_then_unlocks_inputs() {
        let mempool = Mempool::new(2);
        let input = UtxoRef {
            tx_id: "parent".into(),
            output_index: 0,
        };
        let t = tx("xmb_a", vec![input]);
        let id = mempool.submit_raw("leader1", t, 0).unwrap();
        mempool.begin_processing("leader1", &id, "v1", 0).unwrap();

        let early = mempool.finalize("leader1", &id);
        assert!(matches!(early, Err(XmblError::InsufficientValidations { .. })));

        mempool.validate("leader1", &id, "v2").unwrap();
        let finalized = mempool.finalize("leader1", &id);
        assert!(finalized.is_ok());
        assert_eq!(mempool.stats().tx, 1);
        assert_eq!(mempool.stats().processing, 0);
    }

    #[test]
    fn sweep_ttls_evicts_stale_raw_and_resets_stale_processing() {
        let mempool = Mempool::new(3);
        let t1 = tx("xmb_a", vec![]);
        let id1 = mempool.submit_raw("leader1", t1, 0).unwrap();

        let t2 = tx("xmb_b", vec![]);
        let id2 = mempool.submit_raw("leader1", t2, 0).unwrap();
        mempool.begin_processing("leader1", &id2, "v1", 0).unwrap();

        let sweep = mempool.sweep_ttls(100_000, 60_000, 300_00);
        assert_eq!(sweep.expired_raw, vec![("leader1".to_string(), id1)]);
        assert_eq!(sweep.reset_processing, vec![("leader1".to_string(), id2.clone())]);
        assert_eq!(mempool.stats().raw, 1);
        assert_eq!(mempool.stats().processing, 0);
    }
}
