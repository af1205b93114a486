//! MPI communication backend for multi-process runs.
//!
//! Requires the `distributed` feature flag and an MPI installation.
//! The caller must initialize MPI and keep the universe alive for as long
//! as `MpiComm` is used:
//!
//! ```ignore
//! let universe = mpi::initialize().ok_or(...)?;
//! let comm = MpiComm::new();
//! ```
//!
//! Ghost exchange uses `MPI_Sendrecv`, so neighbours issuing the mirror
//! call never deadlock. Scatter and gather use the varcount collectives
//! because balanced blocks may differ in size.

use mpi::datatype::{Partition as Layout, PartitionMut as LayoutMut};
use mpi::point_to_point::send_receive_into;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

use crate::error::{HalocaError, Result};
use crate::ir::Cell;

use super::comm::{check_len, check_rank, CommunicationBackend};
use super::partition::Partition;

/// MPI-based communication backend over the world communicator.
pub struct MpiComm {
    world: SimpleCommunicator,
}

impl MpiComm {
    pub fn new() -> Self {
        Self {
            world: SimpleCommunicator::world(),
        }
    }

    fn process(&self, rank: usize) -> Result<mpi::topology::Process<'_>> {
        check_rank(rank, self.num_ranks())?;
        let rank = Count::try_from(rank)
            .map_err(|_| HalocaError::Topology(format!("rank {rank} exceeds the MPI range")))?;
        Ok(self.world.process_at_rank(rank))
    }
}

impl Default for MpiComm {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-rank counts and displacements of `partition` in MPI's integer type.
fn layout(partition: &Partition) -> Result<(Vec<Count>, Vec<Count>)> {
    let to_count = |v: usize| {
        Count::try_from(v)
            .map_err(|_| HalocaError::Resource(format!("block bound {v} exceeds the MPI count range")))
    };
    let mut counts = Vec::with_capacity(partition.num_workers());
    let mut displs = Vec::with_capacity(partition.num_workers());
    for block in partition.blocks() {
        counts.push(to_count(block.size())?);
        displs.push(to_count(block.start)?);
    }
    Ok((counts, displs))
}

impl CommunicationBackend for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn num_ranks(&self) -> usize {
        self.world.size() as usize
    }

    fn send_recv(
        &self,
        send: &[Cell],
        dest: usize,
        recv: &mut [Cell],
        source: usize,
    ) -> Result<()> {
        let dest = self.process(dest)?;
        let source = self.process(source)?;
        let status = send_receive_into(send, &dest, recv, &source);
        let got = status.count(Cell::equivalent_datatype()) as usize;
        check_len("send_recv", got, recv.len())
    }

    fn scatter(
        &self,
        global: Option<&[Cell]>,
        partition: &Partition,
        local: &mut [Cell],
        root: usize,
    ) -> Result<()> {
        let block = partition.block(self.rank())?;
        check_len("scatter", local.len(), block.size())?;
        let root_process = self.process(root)?;
        if self.rank() == root {
            let global = global
                .ok_or_else(|| HalocaError::Comm("scatter root has no domain".into()))?;
            check_len("scatter", global.len(), partition.width())?;
            let (counts, displs) = layout(partition)?;
            let send = Layout::new(global, counts, &displs[..]);
            root_process.scatter_varcount_into_root(&send, local);
        } else {
            root_process.scatter_varcount_into(local);
        }
        Ok(())
    }

    fn gather(
        &self,
        local: &[Cell],
        partition: &Partition,
        global: Option<&mut [Cell]>,
        root: usize,
    ) -> Result<()> {
        let block = partition.block(self.rank())?;
        check_len("gather", local.len(), block.size())?;
        let root_process = self.process(root)?;
        if self.rank() == root {
            let global = global
                .ok_or_else(|| HalocaError::Comm("gather root has no domain".into()))?;
            check_len("gather", global.len(), partition.width())?;
            let (counts, displs) = layout(partition)?;
            let mut recv = LayoutMut::new(global, counts, &displs[..]);
            root_process.gather_varcount_into_root(local, &mut recv);
        } else {
            root_process.gather_varcount_into(local);
        }
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.world.barrier();
        Ok(())
    }

    fn abort(&self, code: i32) -> ! {
        tracing::error!(rank = self.rank(), code, "aborting MPI job");
        self.world.abort(code)
    }
}
