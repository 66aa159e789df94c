pub mod broadcast;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod error;
pub mod kv;
pub mod leader_election;
pub mod ledger;
pub mod mempool;
pub mod runtime;
pub mod shard;
pub mod state_tree;
pub mod storage_node;
pub mod types;
