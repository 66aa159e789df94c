//! Orchestrates the external-facing `submitTransaction` operation and the
//! validator-driven processing/finalize flow (spec.md §4.6), wiring
//! `Mempool`, `VerkleStateTree`, and `CubicLedger` behind the events
//! subscribers observe on the `Broadcaster`.

use crate::broadcast::{
    Broadcaster, RawTxAdded, TxLifecycle, TOPIC_RAW_TX_ADDED, TOPIC_RAW_TX_EXPIRED, TOPIC_TX_FINALIZED,
    TOPIC_TX_PROCESSING, TOPIC_TX_RESET,
};
use crate::crypto::verify_transaction;
use crate::error::{retry, XmblResult};
use crate::kv::KvStore;
use crate::ledger::CubicLedger;
use crate::mempool::Mempool;
use crate::types::{StateDiff, Timestamp, Transaction, TxHash};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use xmbl_pqc::SignatureProvider;

/// Per-rawTxId finalize serialization: §4.6 requires that concurrent
/// finalize attempts for the same tx resolve to exactly one winner. A
/// single global mutex would serialize unrelated finalizes too, so instead
/// each rawTxId gets its own lock, created lazily.
#[derive(Default)]
struct FinalizeLocks {
    locks: std::sync::Mutex<HashMap<TxHash, Arc<Mutex<()>>>>,
}

impl FinalizeLocks {
    fn lock_for(&self, raw_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("finalize-lock map poisoned");
        locks
            .entry(raw_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct ConsensusWorkflow {
    mempool: Arc<Mempool>,
    ledger: Arc<CubicLedger>,
    broadcaster: Arc<dyn Broadcaster>,
    signer: Arc<dyn SignatureProvider>,
    kv: Arc<dyn KvStore>,
    finalize_locks: FinalizeLocks,
}

impl ConsensusWorkflow {
    pub fn new(
        mempool: Arc<Mempool>,
        ledger: Arc<CubicLedger>,
        broadcaster: Arc<dyn Broadcaster>,
        signer: Arc<dyn SignatureProvider>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            mempool,
            ledger,
            broadcaster,
            signer,
            kv,
            finalize_locks: FinalizeLocks::default(),
        }
    }

    /// Verifies the signature, admits the transaction to the leader's raw
    /// queue, and announces it. Cancelable up to the verification step —
    /// once `submit_raw` succeeds the operation is committed (spec.md §5).
    pub async fn submit_transaction(
        &self,
        leader: &str,
        tx: Transaction,
        public_key: &[u8],
        now: Timestamp,
    ) -> XmblResult<TxHash> {
        verify_transaction(&self.signer, &tx, public_key).await?;

        let raw_id = self.mempool.submit_raw(leader, tx, now)?;

        self.broadcaster
            .publish(
                TOPIC_RAW_TX_ADDED,
                serde_json::to_vec(&RawTxAdded {
                    leader: leader.to_string(),
                    raw_tx_id: raw_id.clone(),
                })
                .expect("event payload always serializes"),
            )
            .await;

        Ok(raw_id)
    }

    pub async fn begin_processing(
        &self,
        leader: &str,
        raw_id: &str,
        validator_id: &str,
        now: Timestamp,
    ) -> XmblResult<()> {
        self.mempool.begin_processing(leader, raw_id, validator_id, now)?;
        self.broadcaster
            .publish(
                TOPIC_TX_PROCESSING,
                serde_json::to_vec(&TxLifecycle {
                    leader: leader.to_string(),
                    raw_tx_id: raw_id.to_string(),
                })
                .expect("event payload always serializes"),
            )
            .await;
        Ok(())
    }

    pub fn validate(&self, leader: &str, raw_id: &str, validator_id: &str) -> XmblResult<()> {
        self.mempool.validate(leader, raw_id, validator_id)
    }

    /// Finalizes `rawId`: computes the StateDiff, applies it to both the
    /// in-memory state tree and the durable `KvStore` (retrying transient
    /// `IoError`s with backoff), appends the block, and announces
    /// `tx:finalized`/`tx:processing`. Concurrent callers for the same
    /// rawTxId serialize on a per-id lock so exactly one performs the work;
    /// the rest observe `Mempool::finalize`'s terminal-state error.
    pub async fn finalize(&self, leader: &str, raw_id: &str, now: Timestamp) -> XmblResult<Transaction> {
        let lock = self.finalize_locks.lock_for(raw_id);
        let _guard = lock.lock().await;

        let tx = self.mempool.finalize(leader, raw_id)?;

        let diff = state_diff_for(&tx, raw_id, now);
        for (key, value) in &diff.changes {
            match value {
                Some(v) => {
                    self.ledger.state_tree().insert(key.as_bytes(), v.clone());
                    retry::with_backoff(|| async { self.kv.put(key.as_bytes(), v).await }).await?;
                }
                None => {
                    self.ledger.state_tree().insert(key.as_bytes(), Vec::new());
                    retry::with_backoff(|| async { self.kv.delete(key.as_bytes()).await }).await?;
                }
            }
        }

        self.ledger.append(tx.clone(), now).await?;

        self.broadcaster
            .publish(
                TOPIC_TX_FINALIZED,
                serde_json::to_vec(&TxLifecycle {
                    leader: leader.to_string(),
                    raw_tx_id: raw_id.to_string(),
                })
                .expect("event payload always serializes"),
            )
            .await;

        Ok(tx)
    }

    /// Sweeps TTL-expired mempool entries, announcing `raw_tx:expired`/
    /// `tx:reset` for each one (spec.md §5 "Timeouts").
    pub async fn sweep_ttls(&self, now: Timestamp, raw_ttl_ms: u64, processing_ttl_ms: u64) {
        let result = self.mempool.sweep_ttls(now, raw_ttl_ms, processing_ttl_ms);

        for (leader, raw_id) in result.expired_raw {
            self.broadcaster
                .publish(
                    TOPIC_RAW_TX_EXPIRED,
                    serde_json::to_vec(&TxLifecycle { leader, raw_tx_id: raw_id }).unwrap(),
                )
                .await;
        }
        for (leader, raw_id) in result.reset_processing {
            self.broadcaster
                .publish(
                    TOPIC_TX_RESET,
                    serde_json::to_vec(&TxLifecycle { leader, raw_tx_id: raw_id }).unwrap(),
                )
                .await;
        }
    }
}

/// Translates a finalized transaction into the state changes it causes:
/// UTXO inputs are marked spent, outputs become new UTXO entries, state
/// transactions write their payload under a `state:{from}` key, storage
/// transactions record a pointer under `storage:{from}:{timestamp}`.
fn state_diff_for(tx: &Transaction, raw_id: &str, now: Timestamp) -> StateDiff {
    let body = tx.body();
    let mut changes = BTreeMap::new();

    for input in &body.inputs {
        changes.insert(format!("utxo:{}:{}", input.tx_id, input.output_index), None);
    }
    for (index, output) in body.outputs.iter().enumerate() {
        let value = serde_json::to_vec(&(output.address.clone(), output.amount.to_string()))
            .expect("utxo output always serializes");
        changes.insert(format!("utxo:{raw_id}:{index}"), Some(value));
    }

    match tx {
        Transaction::State(_) => {
            if let Some(payload) = &body.payload {
                changes.insert(format!("state:{}", body.from), Some(payload.clone()));
            }
        }
        Transaction::Storage(_) => {
            if let Some(payload) = &body.payload {
                changes.insert(format!("storage:{}:{now}", body.from), Some(payload.clone()));
            }
        }
        Transaction::Utxo(_) | Transaction::Compute(_) => {}
    }

    StateDiff {
        tx_id: raw_id.to_string(),
        changes,
        timestamp: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::InProcessBroadcaster;
    use crate::kv::MemoryKvStore;
    use crate::state_tree::VerkleStateTree;
    use crate::types::{Output, TxBody};
    use xmbl_pqc::DilithiumProvider;

    async fn workflow() -> (ConsensusWorkflow, Arc<dyn SignatureProvider>, xmbl_pqc::KeyPair) {
        let signer: Arc<dyn SignatureProvider> = Arc::new(DilithiumProvider::default());
        let kp = signer.keygen().await.unwrap();
        let mempool = Arc::new(Mempool::new(3));
        let tree = Arc::new(VerkleStateTree::new());
        let bus: Arc<dyn Broadcaster> = Arc::new(InProcessBroadcaster::new());
        let ledger = Arc::new(CubicLedger::new(tree, bus.clone()));
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let workflow = ConsensusWorkflow::new(mempool, ledger, bus, signer.clone(), kv);
        (workflow, signer, kp)
    }

    async fn signed_tx(signer: &Arc<dyn SignatureProvider>, kp: &xmbl_pqc::KeyPair, nonce: u64) -> Transaction {
        let from = signer.derive_address(&kp.public_key);
        let unsigned = Transaction::Utxo(TxBody {
            from,
            to: "xmb_recipient".into(),
            amount: 100,
            fee: 1,
            stake: 0,
            timestamp: nonce,
            inputs: vec![],
            outputs: vec![Output {
                address: "xmb_recipient".into(),
                amount: 100,
            }],
            payload: None,
            sig: None,
        });
        let sig = signer.sign(&unsigned.canonical_bytes(), &kp.secret_key).await.unwrap();
        unsigned.with_sig(sig)
    }

    #[tokio::test]
    async fn happy_path_finalize_produces_a_block_and_moves_the_state_root() {
        let (workflow, signer, kp) = workflow().await;
        let tx = signed_tx(&signer, &kp, 1).await;
        let root_before = workflow.ledger.get_state_root();

        let raw_id = workflow.submit_transaction("leader1", tx, &kp.public_key, 0).await.unwrap();
        workflow.begin_processing("leader1", &raw_id, "v1", 0).await.unwrap();
        workflow.validate("leader1", &raw_id, "v2").unwrap();
        workflow.validate("leader1", &raw_id, "v3").unwrap();

        let finalized = workflow.finalize("leader1", &raw_id, 1).await.unwrap();
        assert_eq!(finalized.raw_tx_id(), raw_id);
        assert_ne!(workflow.ledger.get_state_root(), root_before);
    }

    #[tokio::test]
    async fn rejects_submission_with_invalid_signature() {
        let (workflow, signer, kp) = workflow().await;
        let other_kp = signer.keygen().await.unwrap();
        let tx = signed_tx(&signer, &other_kp, 1).await;

        let result = workflow.submit_transaction("leader1", tx, &kp.public_key, 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn second_finalize_attempt_observes_already_finalized() {
        let (workflow, signer, kp) = workflow().await;
        let tx = signed_tx(&signer, &kp, 1).await;
        let raw_id = workflow.submit_transaction("leader1", tx, &kp.public_key, 0).await.unwrap();
        workflow.begin_processing("leader1", &raw_id, "v1", 0).await.unwrap();
        workflow.validate("leader1", &raw_id, "v2").unwrap();
        workflow.validate("leader1", &raw_id, "v3").unwrap();

        workflow.finalize("leader1", &raw_id, 1).await.unwrap();
        let second = workflow.finalize("leader1", &raw_id, 2).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn finalize_persists_the_state_diff_to_the_kv_store() {
        let signer: Arc<dyn SignatureProvider> = Arc::new(DilithiumProvider::default());
        let kp = signer.keygen().await.unwrap();
        let mempool = Arc::new(Mempool::new(1));
        let tree = Arc::new(VerkleStateTree::new());
        let bus: Arc<dyn Broadcaster> = Arc::new(InProcessBroadcaster::new());
        let ledger = Arc::new(CubicLedger::new(tree, bus.clone()));
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let workflow = ConsensusWorkflow::new(mempool, ledger, bus, signer.clone(), kv.clone());

        let tx = signed_tx(&signer, &kp, 1).await;
        let raw_id = workflow.submit_transaction("leader1", tx, &kp.public_key, 0).await.unwrap();
        workflow.begin_processing("leader1", &raw_id, "v1", 0).await.unwrap();
        workflow.finalize("leader1", &raw_id, 1).await.unwrap();

        let stored = kv.get(format!("utxo:{raw_id}:0").as_bytes()).await.unwrap();
        assert!(stored.is_some());
    }
}
