//! Allocation stage: build the fixed-size ordered grid
//!
//! Sub-steps run strictly in order:
//! 1. Fixed pinned placement (`min == max`), first writer wins
//! 2. Ranged pinned placement with nearest-neighbour fallback
//! 3. Fallback placement of any pin still without a cell
//! 4. Pool preparation (carried + suggested, minus pinned ids)
//! 5. Eviction under the configured [`SizeLimitPolicy`]
//! 6. Fill, either in pool order or interleaved by author
//!
//! All randomness comes from the caller's RNG so tests can pin outcomes.

pub mod eviction;
pub mod interleave;
pub mod placer;

pub use eviction::evict;
pub use interleave::{author_distance_shuffle, fill_in_order, fill_interleaved, FRONT_RESERVED_SLOTS};
pub use placer::place_pinned;

use crate::types::{primary_author_key, CandidateItem, CatalogItem, PinnedItem, SizeLimitPolicy};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Ordered sequence of `target_size` cells, each empty or holding one item id
///
/// The number of cells never changes after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGrid {
    cells: Vec<Option<String>>,
}

impl SlotGrid {
    pub fn new(size: usize) -> Self {
        Self {
            cells: vec![None; size],
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// True if `index` is inside the grid and holds nothing
    pub fn is_open(&self, index: usize) -> bool {
        matches!(self.cells.get(index), Some(None))
    }

    /// Item at `index`, if any
    pub fn get(&self, index: usize) -> Option<&str> {
        self.cells.get(index).and_then(|c| c.as_deref())
    }

    /// Put `id` into an open cell; returns false if the cell is taken or out of range
    pub fn place(&mut self, index: usize, id: impl Into<String>) -> bool {
        match self.cells.get_mut(index) {
            Some(cell @ None) => {
                *cell = Some(id.into());
                true
            }
            _ => false,
        }
    }

    /// Indices of all open cells, ascending
    pub fn open_cells(&self) -> Vec<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn first_open(&self) -> Option<usize> {
        self.cells.iter().position(|c| c.is_none())
    }

    pub fn open_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }

    /// Flatten to an ordered id list, dropping empty cells
    pub fn into_ids(self) -> Vec<String> {
        self.cells.into_iter().flatten().collect()
    }
}

/// Inputs to [`allocate`]
#[derive(Debug, Clone)]
pub struct AllocationRequest<'a> {
    pub pinned: &'a [PinnedItem],
    /// Catalog entries of pinned items already in the collection
    pub pinned_present: &'a [CatalogItem],
    /// Survivors of the filter stage
    pub carried: &'a [CandidateItem],
    /// Newly suggested items matched in the catalog
    pub suggested: &'a [CandidateItem],
    pub target_size: usize,
    pub shuffle: bool,
    pub policy: SizeLimitPolicy,
    /// Same-author spacing applied to front-loaded suggestions when shuffling
    pub author_separation: usize,
}

/// Allocation result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    /// Final order, empty cells dropped
    pub ordered_ids: Vec<String>,
    /// Pool items that did not fit
    pub evicted: Vec<CandidateItem>,
    /// Pinned ids left without a cell because the grid was full
    pub unplaced_pins: Vec<String>,
}

/// Run the allocation stage
pub fn allocate<R: Rng + ?Sized>(request: &AllocationRequest<'_>, rng: &mut R) -> Allocation {
    let mut grid = SlotGrid::new(request.target_size);

    let unplaced_pins = place_pinned(&mut grid, request.pinned, request.shuffle, rng);

    let pinned_ids: HashSet<&str> = request.pinned.iter().map(|p| p.id.as_str()).collect();
    let pool: Vec<CandidateItem> = request
        .carried
        .iter()
        .chain(request.suggested.iter())
        .filter(|c| !pinned_ids.contains(c.id.as_str()))
        .cloned()
        .collect();

    let open = grid.open_count();
    let (pool, evicted) = evict(pool, open, request.policy, rng);
    debug!(
        target_size = request.target_size,
        open_slots = open,
        kept = pool.len(),
        evicted = evicted.len(),
        "Pool prepared"
    );

    if request.shuffle {
        let authors = author_lookup(request.pinned, request.pinned_present, &pool);
        fill_interleaved(&mut grid, pool, &authors, request.author_separation, rng);
    } else {
        fill_in_order(&mut grid, pool);
    }

    Allocation {
        ordered_ids: grid.into_ids(),
        evicted,
        unplaced_pins,
    }
}

/// Map every known id to its lowercased primary author
///
/// A pinned item's catalog credit wins over the author given in its pin.
fn author_lookup(
    pinned: &[PinnedItem],
    pinned_present: &[CatalogItem],
    pool: &[CandidateItem],
) -> HashMap<String, String> {
    let mut authors: HashMap<String, String> = pool
        .iter()
        .map(|c| (c.id.clone(), c.author_key()))
        .collect();
    for pin in pinned {
        if let Some(author) = &pin.author {
            authors.insert(pin.id.clone(), primary_author_key(author));
        }
    }
    for item in pinned_present {
        let author = item.primary_author();
        if !author.is_empty() {
            authors.insert(item.id.clone(), author);
        }
    }
    authors
}
