//! Core data model: identities, transactions, and the ledger's geometric
//! primitives (blocks, faces, cubes).
//!
//! The canonical byte form used for signing and hashing is built by hand
//! (`Transaction::canonical_bytes`) rather than derived, because the wire
//! contract requires lexicographically sorted keys and decimal-string
//! numerics regardless of what `serde_json`'s derive would otherwise do.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xmbl_pqc::Signature;

pub type Address = String;
pub type Hash = String;
pub type TxHash = String;
pub type Amount = u128;
pub type Timestamp = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Utxo,
    State,
    Storage,
    Compute,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Utxo => "utxo",
            TxKind::State => "state",
            TxKind::Storage => "storage",
            TxKind::Compute => "compute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoRef {
    pub tx_id: TxHash,
    pub output_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub address: Address,
    pub amount: Amount,
}

/// Fields common to all four transaction kinds (Design Note §9: a tagged
/// variant with one shared body rather than four divergent shapes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxBody {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub fee: Amount,
    pub stake: Amount,
    pub timestamp: Timestamp,
    pub inputs: Vec<UtxoRef>,
    pub outputs: Vec<Output>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<Signature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Transaction {
    Utxo(TxBody),
    State(TxBody),
    Storage(TxBody),
    Compute(TxBody),
}

impl Transaction {
    pub fn kind(&self) -> TxKind {
        match self {
            Transaction::Utxo(_) => TxKind::Utxo,
            Transaction::State(_) => TxKind::State,
            Transaction::Storage(_) => TxKind::Storage,
            Transaction::Compute(_) => TxKind::Compute,
        }
    }

    pub fn body(&self) -> &TxBody {
        match self {
            Transaction::Utxo(b)
            | Transaction::State(b)
            | Transaction::Storage(b)
            | Transaction::Compute(b) => b,
        }
    }

    pub fn body_mut(&mut self) -> &mut TxBody {
        match self {
            Transaction::Utxo(b)
            | Transaction::State(b)
            | Transaction::Storage(b)
            | Transaction::Compute(b) => b,
        }
    }

    pub fn from(&self) -> &Address {
        &self.body().from
    }

    pub fn sig(&self) -> Option<&Signature> {
        self.body().sig.as_ref()
    }

    pub fn with_sig(mut self, sig: Signature) -> Self {
        self.body_mut().sig = Some(sig);
        self
    }

    /// Canonical JSON object for this transaction, keys sorted
    /// lexicographically (guaranteed by `serde_json::Map`'s `BTreeMap`
    /// backing when the `preserve_order` feature is not enabled).
    /// `include_sig` controls whether `sig` (base64) is part of the object;
    /// the signing message always excludes it.
    fn canonical_value(&self, include_sig: bool) -> serde_json::Value {
        let body = self.body();
        let mut map = serde_json::Map::new();
        map.insert("type".into(), serde_json::Value::String(self.kind().as_str().into()));
        map.insert("from".into(), serde_json::Value::String(body.from.clone()));
        map.insert("to".into(), serde_json::Value::String(body.to.clone()));
        map.insert("amount".into(), serde_json::Value::String(body.amount.to_string()));
        map.insert("fee".into(), serde_json::Value::String(body.fee.to_string()));
        map.insert("stake".into(), serde_json::Value::String(body.stake.to_string()));
        map.insert(
            "timestamp".into(),
            serde_json::Value::String(body.timestamp.to_string()),
        );
        map.insert(
            "inputs".into(),
            serde_json::Value::Array(
                body.inputs
                    .iter()
                    .map(|i| {
                        let mut m = serde_json::Map::new();
                        m.insert("txId".into(), serde_json::Value::String(i.tx_id.clone()));
                        m.insert(
                            "outputIndex".into(),
                            serde_json::Value::String(i.output_index.to_string()),
                        );
                        serde_json::Value::Object(m)
                    })
                    .collect(),
            ),
        );
        map.insert(
            "outputs".into(),
            serde_json::Value::Array(
                body.outputs
                    .iter()
                    .map(|o| {
                        let mut m = serde_json::Map::new();
                        m.insert("address".into(), serde_json::Value::String(o.address.clone()));
                        m.insert("amount".into(), serde_json::Value::String(o.amount.to_string()));
                        serde_json::Value::Object(m)
                    })
                    .collect(),
            ),
        );
        if let Some(payload) = &body.payload {
            map.insert(
                "payload".into(),
                serde_json::Value::String(base64_encode(payload)),
            );
        }
        if include_sig {
            if let Some(sig) = &body.sig {
                let mut m = serde_json::Map::new();
                m.insert("data".into(), serde_json::Value::String(base64_encode(&sig.data)));
                m.insert(
                    "algorithm".into(),
                    serde_json::Value::String(format!("{:?}", sig.algorithm)),
                );
                map.insert("sig".into(), serde_json::Value::Object(m));
            }
        }
        serde_json::Value::Object(map)
    }

    /// The exact bytes a `SignatureProvider` signs and verifies against.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.canonical_value(false)).expect("canonical json is always valid")
    }

    /// Canonical bytes of the fully signed transaction, used to derive
    /// `rawTxId` and the block `id` — two distinct signatures over the same
    /// body must not collide into the same identifier.
    pub fn signed_canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.canonical_value(true)).expect("canonical json is always valid")
    }

    pub fn raw_tx_id(&self) -> TxHash {
        blake3::hash(&self.signed_canonical_bytes()).to_hex().to_string()
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: Hash,
    pub tx: Transaction,
    pub timestamp: Timestamp,
    pub coord: Coord,
    /// The first cube face this block's local position touches, `None` for
    /// the single interior position of each cube that touches no face.
    pub face_index: Option<u8>,
    pub cube_index: u64,
    pub level: u32,
}

/// Up to 9 blocks at the 3x3 grid positions of one cube face.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Face {
    pub positions: BTreeMap<u8, Hash>,
    pub complete: bool,
}

impl Face {
    pub fn is_complete(&self) -> bool {
        self.positions.len() == 9
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cube {
    pub id: Hash,
    pub level: u32,
    pub faces: BTreeMap<u8, Face>,
    pub blocks: BTreeMap<Hash, ()>,
    pub complete: bool,
}

impl Cube {
    pub fn is_complete(&self) -> bool {
        self.faces.len() == 6 && self.faces.values().all(Face::is_complete)
    }
}

/// A StateDiff attributable to one finalized transaction. `None` in
/// `changes` denotes a deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDiff {
    pub tx_id: TxHash,
    pub changes: BTreeMap<String, Option<Vec<u8>>>,
    pub timestamp: Timestamp,
}

/// Merges a sequence of diffs: the latest-timestamp value for a key wins,
/// ties broken by `tx_id` lexicographic order (spec.md §3).
pub fn merge_state_diffs(diffs: &[StateDiff]) -> BTreeMap<String, Option<Vec<u8>>> {
    let mut winners: BTreeMap<String, (Timestamp, &TxHash, &Option<Vec<u8>>)> = BTreeMap::new();
    for diff in diffs {
        for (key, value) in &diff.changes {
            let candidate = (diff.timestamp, &diff.tx_id, value);
            winners
                .entry(key.clone())
                .and_modify(|current| {
                    if candidate.0 > current.0 || (candidate.0 == current.0 && candidate.1 > current.1) {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }
    }
    winners
        .into_iter()
        .map(|(k, (_, _, v))| (k, v.clone()))
        .collect()
}
