//! Authenticated key/value store (spec.md §4.3).
//!
//! The exact polynomial commitment scheme is left to the implementer by the
//! spec; this one is a byte-keyed trie with fan-out 256, where every node
//! commits to a BLAKE3 hash of its own value (if any) and the sorted
//! `(byte, child_commitment)` pairs of its children. Determinism follows
//! from the `BTreeMap` child ordering rather than insertion order. Proof
//! size is proportional to the sum of sibling-set sizes along the key path,
//! not the constant-size bound a true vector commitment would give —
//! accepted here since §4.3 defers the exact mechanism (see DESIGN.md).

use std::collections::BTreeMap;
use std::sync::RwLock;

const EMPTY_NODE_TAG: &[u8] = b"XMBL/VERKLE/EMPTY";
const LEAF_TAG: &[u8] = b"L";
const INTERNAL_TAG: &[u8] = b"N";

#[derive(Debug, Clone, Default)]
struct Node {
    value: Option<Vec<u8>>,
    children: BTreeMap<u8, Node>,
}

fn value_hash(value: &[u8]) -> [u8; 32] {
    *blake3::hash(value).as_bytes()
}

fn node_commitment(value: Option<&[u8; 32]>, siblings: &[(u8, [u8; 32])]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    match value {
        Some(h) => {
            hasher.update(LEAF_TAG);
            hasher.update(h);
        }
        None => hasher.update(INTERNAL_TAG),
    };
    let mut sorted = siblings.to_vec();
    sorted.sort_by_key(|(b, _)| *b);
    for (byte, commitment) in sorted {
        hasher.update(&[byte]);
        hasher.update(&commitment);
    }
    *hasher.finalize().as_bytes()
}

impl Node {
    fn commitment(&self) -> [u8; 32] {
        let vh = self.value.as_deref().map(value_hash);
        let siblings: Vec<(u8, [u8; 32])> = self
            .children
            .iter()
            .map(|(b, c)| (*b, c.commitment()))
            .collect();
        node_commitment(vh.as_ref(), &siblings)
    }

    fn insert(&mut self, key: &[u8], value: Vec<u8>) {
        let mut node = self;
        for byte in key {
            node = node.children.entry(*byte).or_default();
        }
        node.value = Some(value);
    }

    fn get(&self, key: &[u8]) -> Option<&Vec<u8>> {
        let mut node = self;
        for byte in key {
            node = node.children.get(byte)?;
        }
        node.value.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct LevelWitness {
    value_hash: Option<[u8; 32]>,
    siblings: Vec<(u8, [u8; 32])>,
}

/// Membership witness for one key, ordered root-to-leaf.
#[derive(Debug, Clone)]
pub struct Witness(Vec<LevelWitness>);

pub struct VerkleStateTree {
    root: RwLock<Node>,
}

impl Default for VerkleStateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl VerkleStateTree {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Node::default()),
        }
    }

    pub fn insert(&self, key: &[u8], value: Vec<u8>) {
        self.root
            .write()
            .expect("state tree lock poisoned")
            .insert(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.root.read().expect("state tree lock poisoned").get(key).cloned()
    }

    pub fn root(&self) -> [u8; 32] {
        let root = self.root.read().expect("state tree lock poisoned");
        if root.value.is_none() && root.children.is_empty() {
            return *blake3::hash(EMPTY_NODE_TAG).as_bytes();
        }
        root.commitment()
    }

    /// Builds the witness for `key`, walking root-to-leaf and recording the
    /// sibling set excluded at each step.
    pub fn proof(&self, key: &[u8]) -> Option<Witness> {
        let root = self.root.read().expect("state tree lock poisoned");
        let mut levels = Vec::with_capacity(key.len() + 1);
        let mut node = &*root;
        for byte in key {
            let vh = node.value.as_deref().map(value_hash);
            let siblings: Vec<(u8, [u8; 32])> = node
                .children
                .iter()
                .filter(|(b, _)| *b != byte)
                .map(|(b, c)| (*b, c.commitment()))
                .collect();
            levels.push(LevelWitness {
                value_hash: vh,
                siblings,
            });
            node = node.children.get(byte)?;
        }
        let leaf_vh = node.value.as_deref().map(value_hash)?;
        let leaf_siblings: Vec<(u8, [u8; 32])> = node
            .children
            .iter()
            .map(|(b, c)| (*b, c.commitment()))
            .collect();
        levels.push(LevelWitness {
            value_hash: Some(leaf_vh),
            siblings: leaf_siblings,
        });
        Some(Witness(levels))
    }

    /// Verifies `witness` proves `key -> value` under `root`, without
    /// touching the live tree.
    pub fn verify(root: &[u8; 32], key: &[u8], value: &[u8], witness: &Witness) -> bool {
        if witness.0.len() != key.len() + 1 {
            return false;
        }
        let leaf = witness.0.last().unwrap();
        if leaf.value_hash != Some(value_hash(value)) {
            return false;
        }
        let mut commitment = node_commitment(leaf.value_hash.as_ref(), &leaf.siblings);
        for depth in (0..key.len()).rev() {
            let level = &witness.0[depth];
            let byte = key[depth];
            let mut siblings = level.siblings.clone();
            siblings.push((byte, commitment));
            commitment = node_commitment(level.value_hash.as_ref(), &siblings);
        }
        &commitment == root
    }
}
