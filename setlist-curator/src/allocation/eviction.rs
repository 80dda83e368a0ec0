//! Size-limit eviction
//!
//! When the candidate pool is larger than the number of open cells, the pool
//! is ordered by the configured policy and truncated. Missing `added_at` sorts
//! as the epoch and missing popularity as zero.

use crate::types::{CandidateItem, SizeLimitPolicy};
use rand::seq::SliceRandom;
use rand::Rng;
use setlist_common::time::epoch;
use std::cmp::Reverse;

/// Split `pool` into `(kept, evicted)` with at most `keep` items kept
///
/// The pool is left in its original order when nothing needs evicting.
pub fn evict<R: Rng + ?Sized>(
    mut pool: Vec<CandidateItem>,
    keep: usize,
    policy: SizeLimitPolicy,
    rng: &mut R,
) -> (Vec<CandidateItem>, Vec<CandidateItem>) {
    if pool.len() <= keep {
        return (pool, Vec::new());
    }

    match policy {
        SizeLimitPolicy::DropNewest => pool.sort_by_key(|c| c.added_at.unwrap_or_else(epoch)),
        SizeLimitPolicy::DropOldest => {
            pool.sort_by_key(|c| Reverse(c.added_at.unwrap_or_else(epoch)))
        }
        SizeLimitPolicy::DropMostPopular => pool.sort_by_key(|c| c.popularity.unwrap_or(0)),
        SizeLimitPolicy::DropLeastPopular => {
            pool.sort_by_key(|c| Reverse(c.popularity.unwrap_or(0)))
        }
        SizeLimitPolicy::DropRandom => pool.shuffle(rng),
    }

    let evicted = pool.split_off(keep);
    (pool, evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandidateOrigin;
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    /// oldest=10d/pop90, mid=5d/pop20, newest=1d/pop95, mid2=4d/pop10
    fn pool() -> Vec<CandidateItem> {
        let now = Utc::now();
        [("oldest", 10, 90), ("mid", 5, 20), ("newest", 1, 95), ("mid2", 4, 10)]
            .iter()
            .map(|(id, days, pop)| CandidateItem {
                id: id.to_string(),
                title: id.to_string(),
                primary_author: "a".to_string(),
                added_at: Some(now - Duration::days(*days)),
                popularity: Some(*pop),
                origin: CandidateOrigin::Carried,
            })
            .collect()
    }

    fn kept_ids(policy: SizeLimitPolicy) -> HashSet<String> {
        let mut rng = StdRng::seed_from_u64(5);
        let (kept, evicted) = evict(pool(), 2, policy, &mut rng);
        assert_eq!(evicted.len(), 2);
        kept.into_iter().map(|c| c.id).collect()
    }

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_drop_newest_keeps_two_oldest() {
        assert_eq!(kept_ids(SizeLimitPolicy::DropNewest), set(&["oldest", "mid"]));
    }

    #[test]
    fn test_drop_oldest_keeps_two_newest() {
        assert_eq!(kept_ids(SizeLimitPolicy::DropOldest), set(&["newest", "mid2"]));
    }

    #[test]
    fn test_drop_least_popular_keeps_most_popular() {
        assert_eq!(kept_ids(SizeLimitPolicy::DropLeastPopular), set(&["newest", "oldest"]));
    }

    #[test]
    fn test_drop_most_popular_keeps_least_popular() {
        assert_eq!(kept_ids(SizeLimitPolicy::DropMostPopular), set(&["mid2", "mid"]));
    }

    #[test]
    fn test_drop_random_keeps_subset() {
        let kept = kept_ids(SizeLimitPolicy::DropRandom);
        assert_eq!(kept.len(), 2);
        assert!(kept.is_subset(&set(&["oldest", "mid", "newest", "mid2"])));
    }

    #[test]
    fn test_missing_values_sort_lowest() {
        let mut items = pool();
        items[2].added_at = None;
        items[2].popularity = None;
        let mut rng = StdRng::seed_from_u64(1);

        let (kept, _) = evict(items.clone(), 1, SizeLimitPolicy::DropNewest, &mut rng);
        assert_eq!(kept[0].id, "newest", "undated item counts as oldest");

        let (kept, _) = evict(items, 1, SizeLimitPolicy::DropMostPopular, &mut rng);
        assert_eq!(kept[0].id, "newest", "unknown popularity counts as zero");
    }

    #[test]
    fn test_no_eviction_preserves_order() {
        let mut rng = StdRng::seed_from_u64(1);
        let (kept, evicted) = evict(pool(), 4, SizeLimitPolicy::DropRandom, &mut rng);
        assert!(evicted.is_empty());
        let ids: Vec<_> = kept.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["oldest", "mid", "newest", "mid2"]);
    }
}
