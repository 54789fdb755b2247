//! Per-image seed resolution for batched generation.
//!
//! A pinned seed `s >= 0` yields `s, s+1, ..., s+n-1` so every image in the
//! batch is reproducible and distinct. Without a pin (`-1` or absent) each
//! image draws its own random seed.

use rand::Rng;
use serde_json::Value;

pub const MAX_BATCH_SIZE: u32 = 8;

/// Seed values stay in the 32-bit range most samplers accept.
const MAX_RANDOM_SEED: u64 = u32::MAX as u64;

pub fn resolve_seeds(seed: Option<i64>, batch_size: u32) -> Vec<u64> {
    let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
    match seed.and_then(|s| u64::try_from(s).ok()) {
        Some(pinned) => (0..u64::from(batch_size))
            .map(|offset| pinned.wrapping_add(offset))
            .collect(),
        None => {
            let mut rng = rand::thread_rng();
            (0..batch_size)
                .map(|_| rng.gen_range(0..=MAX_RANDOM_SEED))
                .collect()
        }
    }
}

/// Read `seed` and `batch_size` from a job's parameter payload.
pub fn seeds_from_params(params: &Value) -> Vec<u64> {
    let seed = params.get("seed").and_then(Value::as_i64);
    let batch_size = params
        .get("batch_size")
        .and_then(Value::as_u64)
        .map_or(1, |n| n.min(u64::from(MAX_BATCH_SIZE)) as u32);
    resolve_seeds(seed, batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pinned_seed_counts_up() {
        assert_eq!(resolve_seeds(Some(42), 3), vec![42, 43, 44]);
    }

    #[test]
    fn test_pinned_single_image() {
        assert_eq!(resolve_seeds(Some(0), 1), vec![0]);
    }

    #[test]
    fn test_unpinned_draws_one_seed_per_image() {
        let seeds = resolve_seeds(Some(-1), 4);
        assert_eq!(seeds.len(), 4);
        assert!(seeds.iter().all(|s| *s <= MAX_RANDOM_SEED));
        assert_eq!(resolve_seeds(None, 2).len(), 2);
    }

    #[test]
    fn test_batch_size_is_clamped() {
        assert_eq!(resolve_seeds(Some(1), 0).len(), 1);
        assert_eq!(resolve_seeds(Some(1), 100).len(), MAX_BATCH_SIZE as usize);
    }

    #[test]
    fn test_seeds_from_params() {
        assert_eq!(
            seeds_from_params(&json!({"seed": 7, "batch_size": 2})),
            vec![7, 8]
        );
        assert_eq!(seeds_from_params(&json!({"seed": 7})), vec![7]);
        assert_eq!(seeds_from_params(&json!({})).len(), 1);
        assert_eq!(
            seeds_from_params(&json!({"seed": 3, "batch_size": 999})).len(),
            8
        );
    }
}
