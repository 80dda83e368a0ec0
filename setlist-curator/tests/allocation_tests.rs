//! Allocation invariants across many random seeds

use rand::rngs::StdRng;
use rand::SeedableRng;
use setlist_curator::allocation::{allocate, AllocationRequest};
use setlist_curator::types::{
    CandidateItem, CatalogItem, PinnedItem, PositionRange, SizeLimitPolicy,
};
use std::collections::HashSet;

const POLICIES: [SizeLimitPolicy; 5] = [
    SizeLimitPolicy::DropNewest,
    SizeLimitPolicy::DropOldest,
    SizeLimitPolicy::DropRandom,
    SizeLimitPolicy::DropMostPopular,
    SizeLimitPolicy::DropLeastPopular,
];

fn pool(prefix: &str, n: usize, suggested: bool) -> Vec<CandidateItem> {
    (0..n)
        .map(|i| {
            let item = CatalogItem::new(
                format!("{}{}", prefix, i),
                format!("Title {}", i),
                format!("Author {}", i % 4),
            );
            if suggested {
                CandidateItem::suggested(&item)
            } else {
                CandidateItem::carried(&item)
            }
        })
        .collect()
}

fn pins() -> Vec<PinnedItem> {
    vec![
        PinnedItem::new("fixed-1", PositionRange::fixed(1)),
        PinnedItem::new("ranged", PositionRange::new(3, 6)),
        PinnedItem::new("fixed-8", PositionRange::fixed(8)),
    ]
}

#[test]
fn test_pins_hold_their_ranges_for_every_seed() {
    let pinned = pins();
    let carried = pool("c", 10, false);
    let suggested = pool("s", 4, true);

    for policy in POLICIES {
        for shuffle in [false, true] {
            for seed in 0..50 {
                let mut rng = StdRng::seed_from_u64(seed);
                let allocation = allocate(
                    &AllocationRequest {
                        pinned: &pinned,
                        pinned_present: &[],
                        carried: &carried,
                        suggested: &suggested,
                        target_size: 8,
                        shuffle,
                        policy,
                        author_separation: 2,
                    },
                    &mut rng,
                );

                let ids = &allocation.ordered_ids;
                assert_eq!(ids.len(), 8, "seed {} policy {:?}", seed, policy);
                assert_eq!(ids[0], "fixed-1");
                assert_eq!(ids[7], "fixed-8");
                let ranged = ids.iter().position(|id| id == "ranged").unwrap();
                assert!((2..=5).contains(&ranged), "ranged pin at index {}", ranged);

                let unique: HashSet<&String> = ids.iter().collect();
                assert_eq!(unique.len(), ids.len());
                assert_eq!(allocation.evicted.len(), 14 - 5);
                assert!(allocation.unplaced_pins.is_empty());
            }
        }
    }
}

#[test]
fn test_small_pool_leaves_no_gaps_between_items() {
    let pinned = vec![PinnedItem::new("p", PositionRange::fixed(2))];
    let carried = pool("c", 2, false);

    let mut rng = StdRng::seed_from_u64(1);
    let allocation = allocate(
        &AllocationRequest {
            pinned: &pinned,
            pinned_present: &[],
            carried: &carried,
            suggested: &[],
            target_size: 10,
            shuffle: false,
            policy: SizeLimitPolicy::DropRandom,
            author_separation: 0,
        },
        &mut rng,
    );

    assert_eq!(allocation.ordered_ids, vec!["c0", "p", "c1"]);
    assert!(allocation.evicted.is_empty());
}

#[test]
fn test_more_pins_than_cells_reports_unplaced() {
    let pinned = vec![
        PinnedItem::new("a", PositionRange::fixed(1)),
        PinnedItem::new("b", PositionRange::fixed(2)),
        PinnedItem::new("c", PositionRange::new(1, 2)),
    ];

    let mut rng = StdRng::seed_from_u64(3);
    let allocation = allocate(
        &AllocationRequest {
            pinned: &pinned,
            pinned_present: &[],
            carried: &[],
            suggested: &[],
            target_size: 2,
            shuffle: false,
            policy: SizeLimitPolicy::DropRandom,
            author_separation: 0,
        },
        &mut rng,
    );

    assert_eq!(allocation.ordered_ids, vec!["a", "b"]);
    assert_eq!(allocation.unplaced_pins, vec!["c".to_string()]);
}
