//! Ordered gather of worker blocks into the coordinator's domain.

use crate::error::Result;
use crate::ir::{Cell, HALO};

use super::comm::CommunicationBackend;
use super::halo::interior_len;
use super::partition::Partition;

/// Places every worker's real cells at its `(start, size)` slot on `root`.
pub struct Collector<'a> {
    partition: &'a Partition,
    root: usize,
}

impl<'a> Collector<'a> {
    pub fn new(partition: &'a Partition, root: usize) -> Self {
        Self { partition, root }
    }

    /// Gather the non-ghost part of `block` from every rank.
    ///
    /// `domain` must be `Some` on the root and is ignored elsewhere. The
    /// result is in rank order whatever order the workers finish in.
    pub fn collect(
        &self,
        comm: &dyn CommunicationBackend,
        block: &[Cell],
        domain: Option<&mut [Cell]>,
    ) -> Result<()> {
        let n = interior_len(block)?;
        comm.gather(&block[HALO..HALO + n], self.partition, domain, self.root)
    }
}
