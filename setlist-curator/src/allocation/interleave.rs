//! Filling open cells
//!
//! Without shuffling, open cells are filled left to right in pool order.
//! With shuffling, the first open cells are reserved for newly suggested
//! items, and the rest are filled greedily from per-author buckets while
//! avoiding the author of the preceding cell. The anti-clustering is a
//! heuristic: once only one author remains, clustering is accepted.

use super::SlotGrid;
use crate::types::CandidateItem;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, VecDeque};

/// Open cells at the front of the grid reserved for new suggestions
pub const FRONT_RESERVED_SLOTS: usize = 30;

/// Fill open cells left to right in pool order
pub fn fill_in_order(grid: &mut SlotGrid, pool: Vec<CandidateItem>) {
    let mut pool = pool.into_iter();
    for index in grid.open_cells() {
        match pool.next() {
            Some(candidate) => {
                grid.place(index, candidate.id);
            }
            None => break,
        }
    }
}

/// Fill open cells, front-loading new suggestions and spreading authors
///
/// `authors` maps item ids (pool and pinned) to lowercased author keys; it is
/// consulted for the item in the preceding cell.
pub fn fill_interleaved<R: Rng + ?Sized>(
    grid: &mut SlotGrid,
    pool: Vec<CandidateItem>,
    authors: &HashMap<String, String>,
    separation: usize,
    rng: &mut R,
) {
    let open = grid.open_cells();
    let reserved = open.len().min(FRONT_RESERVED_SLOTS);

    let (fresh, mut carried): (Vec<_>, Vec<_>) = pool.into_iter().partition(|c| c.is_new());
    carried.shuffle(rng);
    let mut fresh: VecDeque<_> = author_distance_shuffle(fresh, separation, rng).into();
    let mut carried: VecDeque<_> = carried.into();

    for &index in &open[..reserved] {
        let next = fresh.pop_front().or_else(|| carried.pop_front());
        match next {
            Some(candidate) => {
                grid.place(index, candidate.id);
            }
            None => return,
        }
    }

    let mut buckets = AuthorBuckets::new(fresh.into_iter().chain(carried));
    for &index in &open[reserved..] {
        let previous_author = index
            .checked_sub(1)
            .and_then(|prev| grid.get(prev))
            .and_then(|id| authors.get(id));

        let exclude = if buckets.non_empty_count() > 1 {
            previous_author.map(String::as_str)
        } else {
            None
        };

        match buckets.take_largest(|author| Some(author) != exclude, rng) {
            Some(candidate) => {
                grid.place(index, candidate.id);
            }
            None => break,
        }
    }
}

/// Order items so the same author is not repeated within `distance` picks
///
/// Items are bucketed by author and shuffled within each bucket. Each pick
/// takes the fullest bucket among authors not used in the last `distance`
/// picks (ties broken randomly). When every remaining author is inside the
/// window, the window is ignored for that pick.
pub fn author_distance_shuffle<R: Rng + ?Sized>(
    items: Vec<CandidateItem>,
    distance: usize,
    rng: &mut R,
) -> Vec<CandidateItem> {
    let mut buckets = AuthorBuckets::new(items);
    buckets.shuffle_each(rng);

    let mut recent: VecDeque<String> = VecDeque::with_capacity(distance + 1);
    let mut ordered = Vec::with_capacity(buckets.remaining());

    while buckets.remaining() > 0 {
        let picked = match buckets.take_largest(|author| !recent.iter().any(|r| r == author), rng) {
            Some(item) => item,
            None => match buckets.take_largest(|_| true, rng) {
                Some(item) => item,
                None => break,
            },
        };

        recent.push_back(picked.author_key());
        while recent.len() > distance {
            recent.pop_front();
        }
        ordered.push(picked);
    }

    ordered
}

/// Per-author queues in first-seen author order
struct AuthorBuckets {
    buckets: Vec<(String, VecDeque<CandidateItem>)>,
}

impl AuthorBuckets {
    fn new(items: impl IntoIterator<Item = CandidateItem>) -> Self {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut buckets: Vec<(String, VecDeque<CandidateItem>)> = Vec::new();
        for item in items {
            let author = item.author_key();
            let slot = *index.entry(author.clone()).or_insert_with(|| {
                buckets.push((author, VecDeque::new()));
                buckets.len() - 1
            });
            buckets[slot].1.push_back(item);
        }
        Self { buckets }
    }

    fn shuffle_each<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for (_, items) in &mut self.buckets {
            items.make_contiguous().shuffle(rng);
        }
    }

    fn remaining(&self) -> usize {
        self.buckets.iter().map(|(_, b)| b.len()).sum()
    }

    fn non_empty_count(&self) -> usize {
        self.buckets.iter().filter(|(_, b)| !b.is_empty()).count()
    }

    /// Pop the front of the fullest eligible bucket, ties broken randomly
    fn take_largest<R, F>(&mut self, eligible: F, rng: &mut R) -> Option<CandidateItem>
    where
        R: Rng + ?Sized,
        F: Fn(&str) -> bool,
    {
        let candidates: Vec<usize> = self
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, (author, items))| !items.is_empty() && eligible(author))
            .map(|(i, _)| i)
            .collect();

        let largest = candidates
            .iter()
            .map(|&i| self.buckets[i].1.len())
            .max()?;
        let tied: Vec<usize> = candidates
            .into_iter()
            .filter(|&i| self.buckets[i].1.len() == largest)
            .collect();

        let chosen = tied[rng.gen_range(0..tied.len())];
        self.buckets[chosen].1.pop_front()
    }
}
