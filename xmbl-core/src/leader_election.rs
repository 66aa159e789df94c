//! Deterministic leader selection (spec.md §4.5).

pub const GENESIS_SEED: &str = "xmbl-genesis";

fn candidate_hash(seed: &str, candidate_id: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.update(candidate_id.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Selects `count` leaders from `candidates`, sorted by `hash(seed ||
/// candidateId)` with ties broken by candidate id byte order.
pub fn elect(candidates: &[String], count: usize, seed: &str) -> Vec<String> {
    let mut ranked: Vec<(String, [u8; 32])> = candidates
        .iter()
        .map(|c| (c.clone(), candidate_hash(seed, c)))
        .collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(count).map(|(c, _)| c).collect()
}
