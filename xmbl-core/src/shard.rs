//! XOR-based (k, m) erasure coding over fixed-size chunks.
//!
//! Deliberately not Reed–Solomon: a parity shard is the XOR of one group of
//! data shards, so it only recovers a single missing member of its own
//! group. Callers should not assume stronger guarantees than that.

use crate::error::{XmblError, XmblResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub index: usize,
    pub chunk_size: usize,
    pub is_parity: bool,
    pub original_length: usize,
    pub data: Vec<u8>,
}

impl Shard {
    pub fn id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.data);
        hasher.update(&self.index.to_le_bytes());
        hasher.update(&[self.is_parity as u8]);
        hasher.finalize().to_hex().to_string()
    }
}

/// Partitions the `k` data shards into `m` contiguous groups (the last
/// group absorbing any remainder), so that parity shard `p` is the XOR of
/// exactly one contiguous block of data shards. Contiguous grouping, rather
/// than `index % m`, is what makes two *non-adjacent* missing data indices
/// (e.g. 1 and 3 out of 4) fall into distinct, independently recoverable
/// groups.
fn group_size(k: usize, m: usize) -> usize {
    (k + m - 1) / m.max(1)
}

fn group_of(i: usize, k: usize, m: usize) -> usize {
    (i / group_size(k, m)).min(m.saturating_sub(1))
}

/// Splits `data` into `k` equal zero-padded chunks and computes `m` XOR
/// parity shards, per spec.md §4.1.
pub fn encode(data: &[u8], k: usize, m: usize) -> XmblResult<Vec<Shard>> {
    if k == 0 || m == 0 {
        return Err(XmblError::InvalidState("k and m must both be >= 1".into()));
    }
    let original_length = data.len();
    let chunk_size = (original_length + k - 1) / k.max(1);
    let chunk_size = chunk_size.max(1);

    let mut data_shards = Vec::with_capacity(k);
    for i in 0..k {
        let start = i * chunk_size;
        let mut chunk = vec![0u8; chunk_size];
        if start < original_length {
            let end = (start + chunk_size).min(original_length);
            chunk[..end - start].copy_from_slice(&data[start..end]);
        }
        data_shards.push(Shard {
            index: i,
            chunk_size,
            is_parity: false,
            original_length,
            data: chunk,
        });
    }

    let mut parity_shards = Vec::with_capacity(m);
    for p in 0..m {
        let mut parity = vec![0u8; chunk_size];
        for (i, shard) in data_shards.iter().enumerate() {
            if group_of(i, k, m) == p {
                for (acc, byte) in parity.iter_mut().zip(shard.data.iter()) {
                    *acc ^= byte;
                }
            }
        }
        parity_shards.push(Shard {
            index: k + p,
            chunk_size,
            is_parity: true,
            original_length,
            data: parity,
        });
    }

    let mut all = data_shards;
    all.extend(parity_shards);
    Ok(all)
}

/// Reconstructs the original bytes from any subset of shards satisfying the
/// recovery contract: every missing data index has its parity group's
/// parity shard and all other group members present.
pub fn decode(shards: &[Shard], k: usize, m: usize) -> XmblResult<Vec<u8>> {
    if shards.is_empty() {
        return Err(XmblError::InsufficientShards);
    }
    let original_length = shards[0].original_length;
    let chunk_size = shards[0].chunk_size;

    let mut data_slots: Vec<Option<&[u8]>> = vec![None; k];
    let mut parity_slots: Vec<Option<&[u8]>> = vec![None; m];
    for shard in shards {
        if shard.is_parity {
            let p = shard.index - k;
            if p < m {
                parity_slots[p] = Some(&shard.data);
            }
        } else if shard.index < k {
            data_slots[shard.index] = Some(&shard.data);
        }
    }

    if data_slots.iter().all(|s| s.is_some()) {
        let mut out = Vec::with_capacity(k * chunk_size);
        for slot in data_slots {
            out.extend_from_slice(slot.unwrap());
        }
        out.truncate(original_length);
        return Ok(out);
    }

    let mut recovered: Vec<Vec<u8>> = vec![Vec::new(); k];
    for i in 0..k {
        if let Some(s) = data_slots[i] {
            recovered[i] = s.to_vec();
            continue;
        }
        let p = group_of(i, k, m);
        let parity = parity_slots[p].ok_or(XmblError::InsufficientShards)?;
        let mut acc = parity.to_vec();
        for (j, slot) in data_slots.iter().enumerate() {
            if j == i {
                continue;
            }
            if group_of(j, k, m) == p {
                let other = slot.ok_or(XmblError::InsufficientShards)?;
                for (a, b) in acc.iter_mut().zip(other.iter()) {
                    *a ^= b;
                }
            }
        }
        recovered[i] = acc;
    }

    let mut out = Vec::with_capacity(k * chunk_size);
    for chunk in recovered {
        out.extend_from_slice(&chunk);
    }
    out.truncate(original_length);
    Ok(out)
}

/// Fast path used when all data shards are already present; `decode` would
/// reach the same branch, but callers that already know this holds can skip
/// the parity bookkeeping (Design Note §9 distinguishes this from `decode`).
pub fn reconstruct(data_shards: &[Shard]) -> XmblResult<Vec<u8>> {
    if data_shards.is_empty() {
        return Err(XmblError::InsufficientShards);
    }
    let original_length = data_shards[0].original_length;
    let mut sorted = data_shards.to_vec();
    sorted.sort_by_key(|s| s.index);
    let mut out = Vec::with_capacity(sorted.len() * sorted[0].chunk_size);
    for shard in sorted {
        out.extend_from_slice(&shard.data);
    }
    out.truncate(original_length);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_all_shards_present() {
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let shards = encode(&data, 4, 2).unwrap();
        let decoded = decode(&shards, 4, 2).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn recovers_single_missing_data_shard_with_m_one() {
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let shards = encode(&data, 4, 1).unwrap();
        let without_one: Vec<Shard> = shards.into_iter().filter(|s| s.index != 1).collect();
        let decoded = decode(&without_one, 4, 1).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn recovers_two_missing_data_shards_from_distinct_groups() {
        // k=4, m=2 groups contiguously: indices 1 and 3 land in different
        // groups ({0,1} and {2,3}), so losing one member of each is
        // independently recoverable from that group's own parity shard.
        let data = vec![7u8; 1_000_000];
        let shards = encode(&data, 4, 2).unwrap();
        let pruned: Vec<Shard> = shards
            .into_iter()
            .filter(|s| s.index != 1 && s.index != 3)
            .collect();
        let decoded = decode(&pruned, 4, 2).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn fails_when_both_a_data_shard_and_its_parity_are_missing() {
        // k=4, m=2 groups contiguously: data {0,1} -> parity index 4,
        // data {2,3} -> parity index 5. Dropping shard 1 and its own
        // group's parity (4) leaves group 0 unrecoverable.
        let data = vec![9u8; 64];
        let shards = encode(&data, 4, 2).unwrap();
        let pruned: Vec<Shard> = shards
            .into_iter()
            .filter(|s| s.index != 1 && s.index != 4)
            .collect();
        let result = decode(&pruned, 4, 2);
        assert!(matches!(result, Err(XmblError::InsufficientShards)));
    }

    #[test]
    fn truncates_to_original_length_when_not_a_multiple_of_chunk_size() {
        let data = b"12345".to_vec();
        let shards = encode(&data, 3, 1).unwrap();
        let decoded = decode(&shards, 3, 1).unwrap();
        assert_eq!(decoded, data);
    }
}
