//! Communication backend abstraction for the halo-exchange engine.
//!
//! Provides a trait for worker coordination (combined send/receive for ghost
//! cells, scatter and gather rooted at the coordinator) and a single-process
//! implementation where every message goes to the worker itself.

use crate::error::{HalocaError, Result};
use crate::ir::Cell;

use super::partition::Partition;

/// Rank of the coordinator that owns the full domain.
pub const ROOT: usize = 0;

/// Abstraction over inter-worker communication.
///
/// Implementations: `SingleProcessComm` (self-messages only),
/// `ThreadComm` (in-process ring of threads), `MpiComm` (via the mpi crate,
/// `distributed` feature).
///
/// Every rank must issue the same sequence of calls; messages between one
/// pair of ranks are delivered in the order they were sent.
pub trait CommunicationBackend {
    /// This worker's rank.
    fn rank(&self) -> usize;

    /// Total number of workers.
    fn num_ranks(&self) -> usize;

    /// Send `send` to `dest` and receive `recv.len()` cells from `source` as
    /// one operation, so the exchange cannot deadlock against a partner
    /// doing the mirror-image call.
    fn send_recv(&self, send: &[Cell], dest: usize, recv: &mut [Cell], source: usize)
        -> Result<()>;

    /// Distribute `global` (significant on `root` only) so that each rank's
    /// `local` receives its partition block.
    fn scatter(
        &self,
        global: Option<&[Cell]>,
        partition: &Partition,
        local: &mut [Cell],
        root: usize,
    ) -> Result<()>;

    /// Collect every rank's `local` block into `global` on `root`, placed by
    /// the partition in rank order. `global` is ignored on other ranks.
    fn gather(
        &self,
        local: &[Cell],
        partition: &Partition,
        global: Option<&mut [Cell]>,
        root: usize,
    ) -> Result<()>;

    /// Synchronization barrier. Fails if a peer has already exited.
    fn barrier(&self) -> Result<()>;

    /// Terminate every worker of the job with `code`.
    fn abort(&self, code: i32) -> !;
}

/// Check that `rank` names a worker of a `size`-rank job.
pub(crate) fn check_rank(rank: usize, size: usize) -> Result<()> {
    if rank >= size {
        return Err(HalocaError::Topology(format!(
            "rank {rank} outside communicator of {size} workers"
        )));
    }
    Ok(())
}

/// Check that a received message fills the destination exactly.
pub(crate) fn check_len(what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(HalocaError::Comm(format!(
            "{what}: received {got} cells, expected {expected}"
        )));
    }
    Ok(())
}

/// Communication backend for a single worker.
///
/// The only valid partner is rank 0 itself, so a combined send/receive is a
/// copy; this is what makes the single-worker ring wrap around.
pub struct SingleProcessComm;

impl CommunicationBackend for SingleProcessComm {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn send_recv(
        &self,
        send: &[Cell],
        dest: usize,
        recv: &mut [Cell],
        source: usize,
    ) -> Result<()> {
        check_rank(dest, 1)?;
        check_rank(source, 1)?;
        check_len("send_recv", send.len(), recv.len())?;
        recv.copy_from_slice(send);
        Ok(())
    }

    fn scatter(
        &self,
        global: Option<&[Cell]>,
        partition: &Partition,
        local: &mut [Cell],
        root: usize,
    ) -> Result<()> {
        check_rank(root, 1)?;
        let global = global
            .ok_or_else(|| HalocaError::Comm("scatter: root has no global buffer".into()))?;
        let block = partition.block(0)?;
        check_len("scatter", block.size(), local.len())?;
        local.copy_from_slice(&global[block.start..block.end]);
        Ok(())
    }

    fn gather(
        &self,
        local: &[Cell],
        partition: &Partition,
        global: Option<&mut [Cell]>,
        root: usize,
    ) -> Result<()> {
        check_rank(root, 1)?;
        let global = global
            .ok_or_else(|| HalocaError::Comm("gather: root has no global buffer".into()))?;
        let block = partition.block(0)?;
        check_len("gather", local.len(), block.size())?;
        global[block.start..block.end].copy_from_slice(local);
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}
