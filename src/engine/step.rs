//! Step evaluator for 1D extended blocks.

use rayon::prelude::*;

use crate::ir::{Cell, HALO};
use crate::rule::LocalRule;

/// Interior length at which `Driver` switches to `par_step`.
pub const PAR_THRESHOLD: usize = 1 << 16;

/// Compute `next[i] = rule(cur[i-1], cur[i], cur[i+1])` over the interior.
///
/// Ghost cells of `cur` are read, ghost cells of `next` are left untouched.
pub fn step<R: LocalRule>(rule: &R, cur: &[Cell], next: &mut [Cell]) {
    assert_eq!(cur.len(), next.len(), "double buffers differ in length");
    let end = cur.len().saturating_sub(HALO);
    for i in HALO..end {
        next[i] = rule.apply(cur[i - 1], cur[i], cur[i + 1]);
    }
}

/// Same as `step`, with the interior cells evaluated on the rayon pool.
pub fn par_step<R: LocalRule>(rule: &R, cur: &[Cell], next: &mut [Cell]) {
    assert_eq!(cur.len(), next.len(), "double buffers differ in length");
    if cur.len() < 2 * HALO {
        return;
    }
    let end = cur.len() - HALO;
    next[HALO..end]
        .par_iter_mut()
        .zip(cur.par_windows(2 * HALO + 1))
        .for_each(|(out, w)| *out = rule.apply(w[0], w[1], w[2]));
}

/// Two owned buffers whose roles swap after every step.
///
/// `current` is read and `next` is written during a step; they are separate
/// allocations, so a step never reads what it is writing.
#[derive(Debug, Clone)]
pub struct DoubleBuffer {
    current: Vec<Cell>,
    next: Vec<Cell>,
}

impl DoubleBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            current: vec![0; len],
            next: vec![0; len],
        }
    }

    /// Start with `current = cells` and a zeroed `next` of the same length.
    pub fn from_cells(cells: Vec<Cell>) -> Self {
        let next = vec![0; cells.len()];
        Self {
            current: cells,
            next,
        }
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn current(&self) -> &[Cell] {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut [Cell] {
        &mut self.current
    }

    /// Borrow `(current, next)` for one step.
    pub fn split(&mut self) -> (&[Cell], &mut [Cell]) {
        (&self.current, &mut self.next)
    }

    /// Exchange the roles of the two buffers.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
    }
}
