//! Local transition rules.
//!
//! Rules are pure functions of a fixed neighbourhood: no hidden state and no
//! randomness, so a block evolves identically wherever it is evaluated.

use crate::ir::Cell;

/// A radius-1 rule for a 1D automaton.
pub trait LocalRule: Sync {
    /// Next state of the centre cell given its left, centre and right cells.
    fn apply(&self, left: Cell, center: Cell, right: Cell) -> Cell;
}

/// Elementary (two-state, radius-1) automaton identified by its Wolfram code.
///
/// Bit `4*l + 2*c + r` of the code is the next state for neighbourhood
/// `(l, c, r)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementaryRule(u8);

impl ElementaryRule {
    /// `next = left xor (center or right)`.
    pub const RULE_30: ElementaryRule = ElementaryRule(30);

    pub fn new(code: u8) -> Self {
        Self(code)
    }

    pub fn code(&self) -> u8 {
        self.0
    }
}

impl Default for ElementaryRule {
    fn default() -> Self {
        Self::RULE_30
    }
}

impl LocalRule for ElementaryRule {
    #[inline]
    fn apply(&self, left: Cell, center: Cell, right: Cell) -> Cell {
        let pattern = ((left & 1) << 2) | ((center & 1) << 1) | (right & 1);
        (self.0 >> pattern) & 1
    }
}

/// Cells in a 2D Moore neighbourhood, centre included.
pub const MOORE_CELLS: usize = 9;

/// Anneal rule: alive iff the live count over the 9-cell Moore
/// neighbourhood (centre included) is 4 or at least 6.
#[inline]
pub fn anneal(live_in_neighbourhood: u32) -> Cell {
    (live_in_neighbourhood >= 6 || live_in_neighbourhood == 4) as Cell
}
