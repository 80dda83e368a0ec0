//! Pinned item placement
//!
//! Positions in [`PinnedItem`] are 1-based; grid indices are 0-based.

use super::SlotGrid;
use crate::types::PinnedItem;
use rand::Rng;
use tracing::{debug, warn};

/// Place every pinned item into `grid`
///
/// Fixed pins go first, in list order, and the first writer of a position
/// wins. Ranged pins then take an open cell in their range (random under
/// `shuffle`, lowest otherwise) or the nearest open cell outside it. Any pin
/// still without a cell takes the first open cell, in list order.
///
/// Returns the ids of pins that found no open cell at all.
pub fn place_pinned<R: Rng + ?Sized>(
    grid: &mut SlotGrid,
    pinned: &[PinnedItem],
    shuffle: bool,
    rng: &mut R,
) -> Vec<String> {
    let mut placed = vec![false; pinned.len()];

    // Step 1: fixed positions
    for (i, pin) in pinned.iter().enumerate() {
        if !pin.position_range.is_fixed() {
            continue;
        }
        let index = pin.position_range.min.saturating_sub(1);
        if grid.place(index, pin.id.as_str()) {
            placed[i] = true;
        } else {
            debug!(pin = %pin.id, position = pin.position_range.min, "Fixed position unavailable, deferring");
        }
    }

    // Step 2: ranged positions
    for (i, pin) in pinned.iter().enumerate() {
        if pin.position_range.is_fixed() {
            continue;
        }
        let lo = pin.position_range.min.saturating_sub(1);
        let hi = pin.position_range.max.saturating_sub(1);

        let in_range: Vec<usize> = (lo..=hi.min(grid.len().saturating_sub(1)))
            .filter(|&idx| grid.is_open(idx))
            .collect();

        let chosen = if in_range.is_empty() {
            nearest_open(grid, lo, hi)
        } else if shuffle {
            Some(in_range[rng.gen_range(0..in_range.len())])
        } else {
            Some(in_range[0])
        };

        if let Some(index) = chosen {
            placed[i] = grid.place(index, pin.id.as_str());
        }
    }

    // Step 3: fallback to first open cell
    let mut unplaced = Vec::new();
    for (i, pin) in pinned.iter().enumerate() {
        if placed[i] {
            continue;
        }
        match grid.first_open() {
            Some(index) => {
                grid.place(index, pin.id.as_str());
            }
            None => {
                warn!(pin = %pin.id, "No open slot left for pinned item");
                unplaced.push(pin.id.clone());
            }
        }
    }

    unplaced
}

/// Expand outward from `[lo, hi]`; at each offset the left side is checked first
fn nearest_open(grid: &SlotGrid, lo: usize, hi: usize) -> Option<usize> {
    let len = grid.len();
    // Offsets past the end can never be open; start the walk at the grid edge
    let lo = lo.min(len);
    let hi = hi.min(len);
    let mut offset = 1;
    loop {
        let left = lo.checked_sub(offset);
        let right = hi.saturating_add(offset);
        if left.is_none() && right >= len {
            return None;
        }
        if let Some(l) = left {
            if grid.is_open(l) {
                return Some(l);
            }
        }
        if grid.is_open(right) {
            return Some(right);
        }
        offset += 1;
    }
}
