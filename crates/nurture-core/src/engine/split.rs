//! Deterministic split variant assignment.

use crate::models::{SplitConfig, SplitVariant};
use sha2::{Digest, Sha256};

/// Buckets per percentage point.
const RESOLUTION: u64 = 100;

/// Pick the variant for an enrollment. The same id and variant table always
/// yield the same variant.
pub fn assign_variant<'a>(split: &'a SplitConfig, enrollment_id: &str) -> Option<&'a SplitVariant> {
    let total = split.total_percentage();
    if total == 0 {
        return split.variants.first();
    }

    let bucket = stable_hash(enrollment_id) % (total * RESOLUTION);
    let mut upper = 0u64;
    for variant in &split.variants {
        upper += u64::from(variant.percentage) * RESOLUTION;
        if bucket < upper {
            return Some(variant);
        }
    }
    split.variants.last()
}

fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_assignment_is_stable() {
        let split = SplitConfig::even(&["a", "b", "c"]);
        let first = assign_variant(&split, "enrollment-42").unwrap().id.clone();
        for _ in 0..10 {
            assert_eq!(assign_variant(&split, "enrollment-42").unwrap().id, first);
        }
    }

    #[test]
    fn test_distribution_converges() {
        let mut split = SplitConfig::even(&["a", "b"]);
        split.variants[0].percentage = 80;
        split.variants[1].percentage = 20;

        let mut counts: HashMap<String, u32> = HashMap::new();
        for i in 0..10_000 {
            let variant = assign_variant(&split, &format!("enrollment-{i}")).unwrap();
            *counts.entry(variant.id.clone()).or_default() += 1;
        }

        let a = counts.get("a").copied().unwrap_or(0);
        assert!((7_600..=8_400).contains(&a), "variant a got {a}");
    }

    #[test]
    fn test_zero_percent_variant_never_chosen() {
        let mut split = SplitConfig::even(&["a", "b"]);
        split.variants[0].percentage = 100;
        split.variants[1].percentage = 0;

        for i in 0..500 {
            assert_eq!(assign_variant(&split, &i.to_string()).unwrap().id, "a");
        }
    }

    #[test]
    fn test_empty_split() {
        let split = SplitConfig {
            variants: Vec::new(),
            winner_metric: None,
            auto_pick_after: None,
        };
        assert!(assign_variant(&split, "x").is_none());
    }
}
