//! In-process communication backend: one thread per worker.
//!
//! Every ordered pair of ranks gets its own unbounded channel, so sends never
//! block and messages between two ranks stay in order. A worker that fails
//! drops its endpoint; peers then see a disconnected channel and fail too
//! instead of waiting forever.

use std::sync::mpsc::{channel, Receiver, Sender};

use crate::error::{HalocaError, Result};
use crate::ir::Cell;

use super::comm::{check_len, check_rank, CommunicationBackend};
use super::partition::Partition;

/// One worker's endpoint of an in-process ring.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    /// `to[d]` delivers to rank `d`.
    to: Vec<Sender<Vec<Cell>>>,
    /// `from[s]` yields messages sent by rank `s`.
    from: Vec<Receiver<Vec<Cell>>>,
}

impl ThreadComm {
    /// Build the endpoints of a `size`-worker job, indexed by rank.
    pub fn ring(size: usize) -> Result<Vec<ThreadComm>> {
        if size == 0 {
            return Err(HalocaError::Config("worker count must be positive".into()));
        }

        // Outer loop over senders, so each inbox fills in source-rank order.
        let mut outboxes: Vec<Vec<Sender<Vec<Cell>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut inboxes: Vec<Vec<Receiver<Vec<Cell>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        for outbox in outboxes.iter_mut() {
            for inbox in inboxes.iter_mut() {
                let (tx, rx) = channel();
                outbox.push(tx);
                inbox.push(rx);
            }
        }

        let endpoints = outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (to, from))| ThreadComm {
                rank,
                size,
                to,
                from,
            })
            .collect();
        Ok(endpoints)
    }

    fn send(&self, dest: usize, cells: &[Cell]) -> Result<()> {
        check_rank(dest, self.size)?;
        self.to[dest].send(cells.to_vec()).map_err(|_| {
            HalocaError::Comm(format!("rank {} -> {dest}: peer has exited", self.rank))
        })
    }

    fn recv_into(&self, source: usize, buf: &mut [Cell], what: &str) -> Result<()> {
        check_rank(source, self.size)?;
        let msg = self.from[source].recv().map_err(|_| {
            HalocaError::Comm(format!("rank {} <- {source}: peer has exited", self.rank))
        })?;
        check_len(what, msg.len(), buf.len())?;
        buf.copy_from_slice(&msg);
        Ok(())
    }
}

impl CommunicationBackend for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.size
    }

    fn send_recv(
        &self,
        send: &[Cell],
        dest: usize,
        recv: &mut [Cell],
        source: usize,
    ) -> Result<()> {
        check_rank(source, self.size)?;
        // Sends are buffered, so posting the send first cannot deadlock.
        self.send(dest, send)?;
        self.recv_into(source, recv, "send_recv")
    }

    fn scatter(
        &self,
        global: Option<&[Cell]>,
        partition: &Partition,
        local: &mut [Cell],
        root: usize,
    ) -> Result<()> {
        check_rank(root, self.size)?;
        if self.rank != root {
            return self.recv_into(root, local, "scatter");
        }

        let global = global
            .ok_or_else(|| HalocaError::Comm("scatter: root has no global buffer".into()))?;
        check_len("scatter", global.len(), partition.width())?;
        for (r, block) in partition.blocks().iter().enumerate() {
            let part = &global[block.start..block.end];
            if r == root {
                check_len("scatter", part.len(), local.len())?;
                local.copy_from_slice(part);
            } else {
                self.send(r, part)?;
            }
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
        check_rank(root, self.size)?;
        if self.rank != root {
            return self.send(root, local);
        }

        let global = global
            .ok_or_else(|| HalocaError::Comm("gather: root has no global buffer".into()))?;
        check_len("gather", global.len(), partition.width())?;
        // Rank order, regardless of which worker finished first.
        for (r, block) in partition.blocks().iter().enumerate() {
            let slot = &mut global[block.start..block.end];
            if r == root {
                check_len("gather", local.len(), slot.len())?;
                slot.copy_from_slice(local);
            } else {
                self.recv_into(r, slot, "gather")?;
            }
        }
        Ok(())
    }

    /// Everyone checks in with rank 0, which then releases everyone. Built on
    /// the channels so a peer that has exited fails the barrier instead of
    /// blocking it.
    fn barrier(&self) -> Result<()> {
        const COORDINATOR: usize = 0;
        if self.rank != COORDINATOR {
            self.send(COORDINATOR, &[])?;
            return self.recv_into(COORDINATOR, &mut [], "barrier");
        }
        for r in 1..self.size {
            self.recv_into(r, &mut [], "barrier")?;
        }
        for r in 1..self.size {
            self.send(r, &[])?;
        }
        Ok(())
    }

    fn abort(&self, code: i32) -> ! {
        // Every worker is a thread of this process.
        std::process::exit(code)
    }
}
