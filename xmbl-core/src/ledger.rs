//! Cubic ledger assembly (spec.md §4.7): each finalized transaction becomes
//! a block at the next free coordinate; blocks roll up into cubes of 27,
//! cubes roll up into supercubes of 27, recursively. Completion of a
//! cube/supercube is announced on the broadcaster rather than returned, so
//! callers never have to poll.

use crate::broadcast::{
    Broadcaster, CubeComplete, FaceComplete, TOPIC_BLOCK_ADDED, TOPIC_CUBE_COMPLETE, TOPIC_FACE_COMPLETE,
    TOPIC_SUPERCUBE_COMPLETE,
};
use crate::error::{XmblError, XmblResult};
use crate::state_tree::VerkleStateTree;
use crate::types::{Block, Coord, Face, Hash, Transaction, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

const BASE: u64 = 3;
const POSITIONS_PER_CUBE: u64 = 27;

/// Decomposes `n` into base-3 digits `(x, y, z)` giving its local position
/// within its containing cube (each digit in `0..3`).
fn local_digits(n: u64) -> (u8, u8, u8) {
    let mut rem = n;
    let mut digits = [0u8; 3];
    for d in digits.iter_mut() {
        *d = (rem % BASE) as u8;
        rem /= BASE;
    }
    (digits[0], digits[1], digits[2])
}

/// The block's global `(x, y, z)` coordinate, per §4.7's literal formula:
/// every third base-3 digit of `n` feeds one axis (digits 0,3,6,… build
/// `x`, 1,4,7,… build `y`, 2,5,8,… build `z`). Interleaving three digit
/// streams like this is a bijection — `n` is recoverable from `(x,y,z)` by
/// re-interleaving their base-3 digits — and each axis grows monotonically
/// in lockstep with `n` rather than wrapping every 27 blocks.
fn global_coord(n: u64) -> (u64, u64, u64) {
    let mut x = 0u64;
    let mut y = 0u64;
    let mut z = 0u64;
    let mut group = n;
    let mut scale = 1u64;
    loop {
        let (dx, dy, dz) = local_digits(group % POSITIONS_PER_CUBE);
        x += dx as u64 * scale;
        y += dy as u64 * scale;
        z += dz as u64 * scale;
        group /= POSITIONS_PER_CUBE;
        if group == 0 {
            break;
        }
        scale *= BASE;
    }
    (x, y, z)
}

/// Which faces the local position `(x, y, z)` (each in `0..3`) touches on
/// the surface of a 3x3x3 cube. The single center position `(1,1,1)`
/// touches no face. Edge/corner positions touch more than one face, which
/// is why 27 blocks can fill 6 faces of 9 slots each.
fn faces_touched(x: u8, y: u8, z: u8) -> Vec<u8> {
    let mut faces = Vec::new();
    if x == 0 {
        faces.push(0);
    }
    if x == 2 {
        faces.push(1);
    }
    if y == 0 {
        faces.push(2);
    }
    if y == 2 {
        faces.push(3);
    }
    if z == 0 {
        faces.push(4);
    }
    if z == 2 {
        faces.push(5);
    }
    faces
}

/// Position within a single 3x3 face grid, used as the face's slot key.
fn face_slot(face_index: u8, x: u8, y: u8, z: u8) -> u8 {
    let (a, b) = match face_index {
        0 | 1 => (y, z),
        2 | 3 => (x, z),
        _ => (x, y),
    };
    a * 3 + b
}

fn container_hash(prefix: &str, level: u32, index: u64, children: &BTreeMap<u64, Hash>) -> Hash {
    #[derive(Serialize)]
    struct Payload<'a> {
        prefix: &'a str,
        level: u32,
        index: u64,
        children: &'a BTreeMap<u64, Hash>,
    }
    let bytes = serde_json::to_vec(&Payload {
        prefix,
        level,
        index,
        children,
    })
    .expect("container payload always serializes");
    blake3::hash(&bytes).to_hex().to_string()
}

struct ContainerState {
    faces: BTreeMap<u8, Face>,
    children: BTreeMap<u64, Hash>,
    complete: bool,
}

impl ContainerState {
    fn new_level0() -> Self {
        let mut faces = BTreeMap::new();
        for f in 0..6u8 {
            faces.insert(f, Face::default());
        }
        Self {
            faces,
            children: BTreeMap::new(),
            complete: false,
        }
    }

    fn new_supercube() -> Self {
        Self {
            faces: BTreeMap::new(),
            children: BTreeMap::new(),
            complete: false,
        }
    }
}

/// The append-only cubic structure itself. Holds the state tree it keeps
/// in sync with every finalized transaction, and the broadcaster used to
/// announce block/face/cube/supercube completions.
pub struct CubicLedger {
    next_index: RwLock<u64>,
    blocks: RwLock<BTreeMap<Hash, Block>>,
    containers: RwLock<BTreeMap<(u32, u64), ContainerState>>,
    state_tree: Arc<VerkleStateTree>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl CubicLedger {
    pub fn new(state_tree: Arc<VerkleStateTree>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            next_index: RwLock::new(0),
            blocks: RwLock::new(BTreeMap::new()),
            containers: RwLock::new(BTreeMap::new()),
            state_tree,
            broadcaster,
        }
    }

    /// Allocates the next coordinate, builds and stores the block, updates
    /// face/cube/supercube membership, and publishes every completion this
    /// single append causes (it may cascade through several levels).
    pub async fn append(&self, tx: Transaction, timestamp: Timestamp) -> XmblResult<Block> {
        let index = {
            let mut next = self.next_index.write().expect("ledger lock poisoned");
            let i = *next;
            *next += 1;
            i
        };

        // Local digits (this block's position within its immediate level-0
        // cube) drive face/slot membership; the global coordinate stored on
        // the block is built from every digit of `index`, per §4.7.
        let local_in_cube = index % POSITIONS_PER_CUBE;
        let (lx, ly, lz) = local_digits(local_in_cube);
        let cube_index = index / POSITIONS_PER_CUBE;

        let (gx, gy, gz) = global_coord(index);
        let coord = Coord { x: gx, y: gy, z: gz };
        let faces = faces_touched(lx, ly, lz);
        let primary_face = faces.first().copied();

        // id = hash(canonical(tx) || coord || level), per the block identity rule.
        let mut hasher = blake3::Hasher::new();
        hasher.update(&tx.canonical_bytes());
        hasher.update(&coord.x.to_le_bytes());
        hasher.update(&coord.y.to_le_bytes());
        hasher.update(&coord.z.to_le_bytes());
        hasher.update(&0u32.to_le_bytes());
        let block_id = hasher.finalize().to_hex().to_string();

        let block = Block {
            id: block_id.clone(),
            tx,
            timestamp,
            coord,
            face_index: primary_face,
            cube_index,
            level: 0,
        };

        self.blocks.write().expect("ledger lock poisoned").insert(block_id.clone(), block.clone());
        self.broadcaster
            .publish(TOPIC_BLOCK_ADDED, serde_json::to_vec(&serde_json::json!({ "blockId": block_id })).unwrap())
            .await;

        self.record_into_cube(0, cube_index, &faces, lx, ly, lz, block_id).await?;

        Ok(block)
    }

    /// Places `block_id` into its level-0 cube's faces, firing face/cube
    /// events, then recurses upward if the cube just completed.
    async fn record_into_cube(
        &self,
        level: u32,
        cube_index: u64,
        faces: &[u8],
        lx: u8,
        ly: u8,
        lz: u8,
        block_id: Hash,
    ) -> XmblResult<()> {
        let mut just_completed_faces = Vec::new();
        let cube_just_completed;
        let cube_id;

        {
            let mut containers = self.containers.write().expect("ledger lock poisoned");
            let container = containers
                .entry((level, cube_index))
                .or_insert_with(ContainerState::new_level0);

            for &f in faces {
                let slot = face_slot(f, lx, ly, lz);
                let face = container.faces.entry(f).or_default();
                let was_complete = face.complete;
                face.positions.insert(slot, block_id.clone());
                face.complete = face.positions.len() == 9;
                if face.complete && !was_complete {
                    just_completed_faces.push(f);
                }
            }

            container.children.insert(
                ((lx as u64) * 9) + (ly as u64) * 3 + lz as u64,
                block_id.clone(),
            );

            let was_complete = container.complete;
            container.complete = container.children.len() as u64 == POSITIONS_PER_CUBE
                && container.faces.values().all(|f| f.complete);
            cube_just_completed = container.complete && !was_complete;
            cube_id = container_hash("cube", level, cube_index, &container.children);
        }

        for f in just_completed_faces {
            self.broadcaster
                .publish(
                    TOPIC_FACE_COMPLETE,
                    serde_json::to_vec(&FaceComplete {
                        cube_id: cube_id.clone(),
                        face_index: f,
                    })
                    .unwrap(),
                )
                .await;
        }

        if cube_just_completed {
            self.broadcaster
                .publish(
                    TOPIC_CUBE_COMPLETE,
                    serde_json::to_vec(&CubeComplete {
                        cube_id: cube_id.clone(),
                        level,
                    })
                    .unwrap(),
                )
                .await;
            Box::pin(self.record_into_supercube(level + 1, cube_index / POSITIONS_PER_CUBE, cube_index % POSITIONS_PER_CUBE, cube_id)).await?;
        }

        Ok(())
    }

    /// Supercubes have no face concept — completion is just 27 children.
    async fn record_into_supercube(
        &self,
        level: u32,
        parent_index: u64,
        local_index: u64,
        child_id: Hash,
    ) -> XmblResult<()> {
        let completed;
        let container_id;
        {
            let mut containers = self.containers.write().expect("ledger lock poisoned");
            let container = containers
                .entry((level, parent_index))
                .or_insert_with(ContainerState::new_supercube);
            let was_complete = container.complete;
            container.children.insert(local_index, child_id);
            container.complete = container.children.len() as u64 == POSITIONS_PER_CUBE;
            completed = container.complete && !was_complete;
            container_id = container_hash("supercube", level, parent_index, &container.children);
        }

        if completed {
            self.broadcaster
                .publish(
                    TOPIC_SUPERCUBE_COMPLETE,
                    serde_json::to_vec(&CubeComplete {
                        cube_id: container_id.clone(),
                        level,
                    })
                    .unwrap(),
                )
                .await;
            Box::pin(self.record_into_supercube(
                level + 1,
                parent_index / POSITIONS_PER_CUBE,
                parent_index % POSITIONS_PER_CUBE,
                container_id,
            ))
            .await?;
        }
        Ok(())
    }

    pub fn get_block(&self, block_id: &str) -> XmblResult<Block> {
        self.blocks
            .read()
            .expect("ledger lock poisoned")
            .get(block_id)
            .cloned()
            .ok_or_else(|| XmblError::NotFound(format!("block {block_id}")))
    }

    pub fn cube_count(&self, level: u32) -> usize {
        self.containers
            .read()
            .expect("ledger lock poisoned")
            .keys()
            .filter(|(l, _)| *l == level)
            .count()
    }

    pub fn is_cube_complete(&self, level: u32, index: u64) -> bool {
        self.containers
            .read()
            .expect("ledger lock poisoned")
            .get(&(level, index))
            .map(|c| c.complete)
            .unwrap_or(false)
    }

    pub fn get_state_root(&self) -> [u8; 32] {
        self.state_tree.root()
    }

    pub fn state_tree(&self) -> &Arc<VerkleStateTree> {
        &self.state_tree
    }
}
