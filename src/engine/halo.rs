//! Ghost-cell exchange between ring neighbours.
//!
//! An extended block is `[ghost | real cells | ghost]` with `HALO` ghosts per
//! side. After `exchange` returns, the left ghost holds `prev`'s rightmost
//! real cell and the right ghost holds `next`'s leftmost real cell.

use crate::error::{HalocaError, Result};
use crate::ir::{Cell, HALO};

use super::comm::CommunicationBackend;
use super::partition::RingTopology;

/// Refreshes the ghost cells of one worker's block before every step.
#[derive(Debug, Clone, Copy)]
pub struct HaloExchanger {
    topology: RingTopology,
}

impl HaloExchanger {
    /// Exchanger for the calling worker's place on the ring.
    pub fn new(comm: &dyn CommunicationBackend) -> Result<Self> {
        let topology = RingTopology::new(comm.rank(), comm.num_ranks())?;
        Ok(Self { topology })
    }

    pub fn topology(&self) -> RingTopology {
        self.topology
    }

    /// Fill both ghost regions of `block` from the ring neighbours.
    ///
    /// Two ordered combined exchanges: first right boundary to `next` while
    /// the left ghost arrives from `prev`, then left boundary to `prev` while
    /// the right ghost arrives from `next`. With a single worker both
    /// partners are the worker itself and the block wraps onto itself.
    pub fn exchange(&self, comm: &dyn CommunicationBackend, block: &mut [Cell]) -> Result<()> {
        let n = interior_len(block)?;
        let prev = self.topology.prev();
        let next = self.topology.next();

        let (left_ghost, rest) = block.split_at_mut(HALO);
        comm.send_recv(&rest[n - HALO..n], next, left_ghost, prev)?;

        let (body, right_ghost) = block.split_at_mut(HALO + n);
        comm.send_recv(&body[HALO..2 * HALO], prev, right_ghost, next)?;

        tracing::trace!(rank = self.topology.rank(), prev, next, "halo exchanged");
        Ok(())
    }
}

/// Number of real cells in an extended block.
pub fn interior_len(block: &[Cell]) -> Result<usize> {
    match block.len().checked_sub(2 * HALO) {
        Some(n) if n >= HALO => Ok(n),
        _ => Err(HalocaError::Config(format!(
            "extended block of {} cells has no room for {HALO} ghost cell(s) per side",
            block.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::comm::SingleProcessComm;
    use crate::engine::comm_local::ThreadComm;
    use std::thread;

    #[test]
    fn single_worker_wraps_onto_itself() {
        let comm = SingleProcessComm;
        let halo = HaloExchanger::new(&comm).unwrap();
        // [ghost, 1, 0, 0, 0, ghost]
        let mut block = vec![9, 1, 0, 0, 0, 9];
        halo.exchange(&comm, &mut block).unwrap();
        assert_eq!(block[0], 0, "left ghost mirrors cell [3]");
        assert_eq!(block[5], 1, "right ghost mirrors cell [0]");
        assert_eq!(&block[1..5], &[1, 0, 0, 0]);
    }

    #[test]
    fn ghosts_receive_neighbour_boundaries() {
        // Rank r owns [r*10 + 1, r*10 + 2, r*10 + 3].
        let ring = ThreadComm::ring(3).unwrap();
        let blocks: Vec<Vec<Cell>> = thread::scope(|s| {
            let handles: Vec<_> = ring
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let base = (comm.rank() * 10) as Cell;
                        let mut block = vec![0, base + 1, base + 2, base + 3, 0];
                        let halo = HaloExchanger::new(&comm).unwrap();
                        halo.exchange(&comm, &mut block).unwrap();
                        block
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(blocks[0], vec![23, 1, 2, 3, 11]);
        assert_eq!(blocks[1], vec![3, 11, 12, 13, 21]);
        assert_eq!(blocks[2], vec![13, 21, 22, 23, 1]);
    }

    #[test]
    fn single_cell_blocks_exchange_correctly() {
        let ring = ThreadComm::ring(2).unwrap();
        let blocks: Vec<Vec<Cell>> = thread::scope(|s| {
            let handles: Vec<_> = ring
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mut block = vec![0, comm.rank() as Cell + 5, 0];
                        HaloExchanger::new(&comm)
                            .unwrap()
                            .exchange(&comm, &mut block)
                            .unwrap();
                        block
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(blocks[0], vec![6, 5, 6]);
        assert_eq!(blocks[1], vec![5, 6, 5]);
    }

    #[test]
    fn block_without_interior_is_rejected() {
        let comm = SingleProcessComm;
        let halo = HaloExchanger::new(&comm).unwrap();
        let mut block = vec![0, 0];
        assert!(matches!(
            halo.exchange(&comm, &mut block),
            Err(HalocaError::Config(_))
        ));
    }
}
