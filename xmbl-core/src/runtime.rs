//! Core Facade (spec.md §9 Design Notes: shared mutable singletons become
//! explicit construction of a `Runtime` struct passed by reference, never
//! a process-wide global). Wires Mempool, CubicLedger, VerkleStateTree,
//! ConsensusWorkflow, and the off-chain storage path behind one handle.

use crate::broadcast::{Broadcaster, InProcessBroadcaster};
use crate::config::RuntimeConfig;
use crate::consensus::ConsensusWorkflow;
use crate::error::XmblResult;
use crate::kv::KvStore;
use crate::ledger::CubicLedger;
use crate::mempool::Mempool;
use crate::shard::{self, Shard};
use crate::state_tree::VerkleStateTree;
use crate::storage_node::StorageNode;
use crate::types::{Block, Timestamp, Transaction, TxHash};
use std::sync::Arc;
use xmbl_pqc::{DilithiumProvider, SignatureProvider};

/// Everything one XMBL node needs, constructed once at startup and passed
/// around by reference. No part of this struct is a singleton — a test can
/// build as many independent `Runtime`s as it likes.
pub struct Runtime {
    pub mempool: Arc<Mempool>,
    pub ledger: Arc<CubicLedger>,
    pub state_tree: Arc<VerkleStateTree>,
    pub consensus: ConsensusWorkflow,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub signer: Arc<dyn SignatureProvider>,
    pub kv: Arc<dyn KvStore>,
    pub storage_node: Arc<StorageNode>,
    pub config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, kv: Arc<dyn KvStore>) -> Self {
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(InProcessBroadcaster::new());
        let signer: Arc<dyn SignatureProvider> = Arc::new(DilithiumProvider::default());
        let mempool = Arc::new(Mempool::new(config.consensus.required_validations));
        let state_tree = Arc::new(VerkleStateTree::new());
        let ledger = Arc::new(CubicLedger::new(state_tree.clone(), broadcaster.clone()));
        let consensus = ConsensusWorkflow::new(
            mempool.clone(),
            ledger.clone(),
            broadcaster.clone(),
            signer.clone(),
            kv.clone(),
        );
        let storage_node = Arc::new(StorageNode::new(config.storage.capacity));

        Self {
            mempool,
            ledger,
            state_tree,
            consensus,
            broadcaster,
            signer,
            kv,
            storage_node,
            config,
        }
    }

    /// The single external entry point named in spec.md §2's Core Facade row.
    pub async fn submit_transaction(
        &self,
        leader: &str,
        tx: Transaction,
        public_key: &[u8],
        now: Timestamp,
    ) -> XmblResult<TxHash> {
        self.consensus.submit_transaction(leader, tx, public_key, now).await
    }

    pub fn get_block(&self, block_id: &str) -> XmblResult<Block> {
        self.ledger.get_block(block_id)
    }

    /// Erasure-codes `data` per the configured shard count and distributes
    /// data and parity shards across `self.storage_node` — a single-node
    /// placement; a multi-node deployment would round-robin across peers.
    pub fn store_payload(&self, data: &[u8], k: usize, m: usize) -> XmblResult<Vec<String>> {
        let shards = shard::encode(data, k, m)?;
        let mut ids = Vec::with_capacity(shards.len());
        for s in shards {
            ids.push(self.storage_node.store_shard(s)?);
        }
        Ok(ids)
    }

    pub fn recover_payload(&self, shard_ids: &[String], k: usize, m: usize) -> XmblResult<Vec<u8>> {
        let mut shards: Vec<Shard> = Vec::new();
        for id in shard_ids {
            if let Ok(s) = self.storage_node.get_shard(id) {
                shards.push(s);
            }
        }
        shard::decode(&shards, k, m)
    }

    pub async fn sweep_ttls(&self, now: Timestamp) {
        self.consensus
            .sweep_ttls(now, self.config.consensus.raw_ttl_ms, self.config.consensus.processing_ttl_ms)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::types::{Output, TxBody};

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default(), Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn submit_transaction_reaches_the_mempool() {
        let rt = runtime();
        let kp = rt.signer.keygen().await.unwrap();
        let from = rt.signer.derive_address(&kp.public_key);
        let unsigned = Transaction::Utxo(TxBody {
            from,
            to: "xmb_recipient".into(),
            amount: 10,
            fee: 0,
            stake: 0,
            timestamp: 0,
            inputs: vec![],
            outputs: vec![Output {
                address: "xmb_recipient".into(),
                amount: 10,
            }],
            payload: None,
            sig: None,
        });
        let sig = rt.signer.sign(&unsigned.canonical_bytes(), &kp.secret_key).await.unwrap();
        let tx = unsigned.with_sig(sig);

        let raw_id = rt.submit_transaction("leader1", tx, &kp.public_key, 0).await.unwrap();
        assert_eq!(rt.mempool.stats().raw, 1);
        assert!(!raw_id.is_empty());
    }

    #[test]
    fn store_and_recover_payload_round_trips() {
        let rt = runtime();
        let data = vec![7u8; 4096];
        let ids = rt.store_payload(&data, 4, 2).unwrap();
        assert_eq!(ids.len(), 6);
        let recovered = rt.recover_payload(&ids, 4, 2).unwrap();
        assert_eq!(recovered, data);
    }
}
