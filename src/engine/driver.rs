//! Ring automaton driver.
//!
//! Every rank runs `run_rank` with its own communication endpoint:
//!
//! ```text
//! INIT -> { SNAPSHOT -> EXCHANGE -> EVALUATE -> swap -> COLLECT } x steps -> barrier -> TERMINATE
//! ```
//!
//! Snapshot `s` is the domain entering step `s`, so snapshot 0 is the
//! initial condition and `steps = 0` records nothing. The final domain
//! (after all transitions) is returned on the coordinator.

use std::thread;

use crate::error::{HalocaError, Result};
use crate::ir::{Cell, InitialCondition, DEFAULT_STEPS, DEFAULT_WIDTH, HALO};
use crate::rule::ElementaryRule;

use super::collect::Collector;
use super::comm::{CommunicationBackend, SingleProcessComm, ROOT};
use super::comm_local::ThreadComm;
use super::halo::HaloExchanger;
use super::partition::{Partition, PartitionPolicy};
use super::step::{par_step, step, DoubleBuffer, PAR_THRESHOLD};

/// Parameters of one ring-automaton run.
#[derive(Debug, Clone, PartialEq)]
pub struct RingConfig {
    pub width: usize,
    pub steps: usize,
    pub rule: ElementaryRule,
    pub policy: PartitionPolicy,
    pub initial: InitialCondition,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            steps: DEFAULT_STEPS,
            rule: ElementaryRule::RULE_30,
            policy: PartitionPolicy::Balanced,
            initial: InitialCondition::SingleCenter,
        }
    }
}

/// Receives the full domain once per step, on the coordinator only.
pub trait SnapshotSink {
    fn record(&mut self, step: usize, cells: &[Cell]) -> Result<()>;

    /// Called once after the last step.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory snapshot sequence.
impl SnapshotSink for Vec<Vec<Cell>> {
    fn record(&mut self, _step: usize, cells: &[Cell]) -> Result<()> {
        self.push(cells.to_vec());
        Ok(())
    }
}

/// Run this rank's share of the automaton.
///
/// Returns `Some(final_domain)` on the coordinator and `None` elsewhere.
/// `sink` is only consulted on the coordinator.
pub fn run_rank(
    comm: &dyn CommunicationBackend,
    config: &RingConfig,
    mut sink: Option<&mut dyn SnapshotSink>,
) -> Result<Option<Vec<Cell>>> {
    let rank = comm.rank();
    let _span = tracing::info_span!("ring_rank", rank, width = config.width, steps = config.steps)
        .entered();

    // INIT. Every rank validates the same inputs, so they fail together.
    let partition = Partition::new(config.width, comm.num_ranks(), config.policy)?;
    config.initial.validate(config.width)?;
    let halo = HaloExchanger::new(comm)?;
    let collector = Collector::new(&partition, ROOT);
    let block = partition.block(rank)?;
    let n = block.size();
    tracing::debug!(
        start = block.start,
        size = n,
        prev = halo.topology().prev(),
        next = halo.topology().next(),
        "block assigned"
    );

    let mut domain = if rank == ROOT {
        Some(config.initial.build(config.width)?)
    } else {
        None
    };
    let mut buffers = DoubleBuffer::new(n + 2 * HALO);
    comm.scatter(
        domain.as_deref(),
        &partition,
        &mut buffers.current_mut()[HALO..HALO + n],
        ROOT,
    )?;

    let parallel = n >= PAR_THRESHOLD;
    for s in 0..config.steps {
        if let (Some(cells), Some(sink)) = (domain.as_deref(), sink.as_deref_mut()) {
            sink.record(s, cells)?;
        }

        halo.exchange(comm, buffers.current_mut())?;
        {
            let (cur, next) = buffers.split();
            if parallel {
                par_step(&config.rule, cur, next);
            } else {
                step(&config.rule, cur, next);
            }
        }
        buffers.swap();
        collector.collect(comm, buffers.current(), domain.as_deref_mut())?;
        tracing::trace!(rank, step = s, "step complete");
    }

    // TERMINATE. Nobody leaves before every rank has finished its last step.
    comm.barrier()?;
    if rank == ROOT {
        if let Some(sink) = sink {
            sink.finish()?;
        }
    }
    Ok(domain)
}

/// Run the automaton on `workers` in-process workers and return the final
/// domain.
///
/// One worker runs inline with `SingleProcessComm`; more workers each get a
/// scoped thread connected by `ThreadComm`. The coordinator (rank 0) runs on
/// the calling thread and owns `sink`.
pub fn run_local(
    config: &RingConfig,
    workers: usize,
    sink: Option<&mut dyn SnapshotSink>,
) -> Result<Vec<Cell>> {
    let _span = tracing::info_span!("ring_run", workers, rule = config.rule.code()).entered();

    // Reject bad configurations before spawning anything.
    Partition::new(config.width, workers, config.policy)?;
    config.initial.validate(config.width)?;

    if workers == 1 {
        return run_rank(&SingleProcessComm, config, sink)?
            .ok_or_else(|| HalocaError::Comm("coordinator returned no domain".into()));
    }

    let mut endpoints = ThreadComm::ring(workers)?.into_iter();
    let root = endpoints
        .next()
        .ok_or_else(|| HalocaError::Comm("ring has no coordinator endpoint".into()))?;

    thread::scope(|s| {
        let handles: Vec<_> = endpoints
            .map(|comm| {
                s.spawn(move || {
                    let rank = comm.rank();
                    run_rank(&comm, config, None).map_err(|e| {
                        tracing::debug!(rank, error = %e, "worker failed");
                        e
                    })
                })
            })
            .collect();

        // The coordinator's endpoint is dropped when this returns, which
        // unblocks any worker still waiting on it.
        let root_result = {
            let comm = root;
            run_rank(&comm, config, sink)
        };

        let mut worker_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    worker_error.get_or_insert(e);
                }
                Err(_) => {
                    worker_error.get_or_insert(HalocaError::Comm("worker thread panicked".into()));
                }
            }
        }

        let domain = root_result?
            .ok_or_else(|| HalocaError::Comm("coordinator returned no domain".into()))?;
        match worker_error {
            Some(e) => Err(e),
            None => Ok(domain),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: usize, steps: usize) -> RingConfig {
        RingConfig {
            width,
            steps,
            ..RingConfig::default()
        }
    }

    #[test]
    fn rule30_first_step_from_single_cell() {
        let mut snapshots: Vec<Vec<Cell>> = Vec::new();
        let last = run_local(&config(7, 2), 1, Some(&mut snapshots)).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0], vec![0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(snapshots[1], vec![0, 0, 1, 1, 1, 0, 0]);
        assert_eq!(last, vec![0, 1, 1, 0, 0, 1, 0]);
    }

    #[test]
    fn zero_steps_records_nothing() {
        let mut snapshots: Vec<Vec<Cell>> = Vec::new();
        let last = run_local(&config(8, 0), 2, Some(&mut snapshots)).unwrap();
        assert!(snapshots.is_empty());
        assert_eq!(last, vec![0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn single_worker_domain_is_circular() {
        // A live cell at the right edge feeds the left edge through the wrap.
        let cfg = RingConfig {
            initial: InitialCondition::Cells(vec![0, 0, 0, 1]),
            ..config(4, 1)
        };
        let last = run_local(&cfg, 1, None).unwrap();
        // Rule 30: cell 0 sees (1, 0, 0) -> 1; cell 2 sees (0, 0, 1) -> 1.
        assert_eq!(last, vec![1, 0, 1, 1]);
    }

    #[test]
    fn worker_count_does_not_change_results() {
        let cfg = RingConfig {
            initial: InitialCondition::Random { seed: 7, density: 0.3 },
            ..config(64, 40)
        };
        let mut one: Vec<Vec<Cell>> = Vec::new();
        let mut four: Vec<Vec<Cell>> = Vec::new();
        let a = run_local(&cfg, 1, Some(&mut one)).unwrap();
        let b = run_local(&cfg, 4, Some(&mut four)).unwrap();
        assert_eq!(one, four);
        assert_eq!(a, b);
    }

    struct FailingSink {
        fail_at: usize,
    }

    impl SnapshotSink for FailingSink {
        fn record(&mut self, step: usize, _cells: &[Cell]) -> Result<()> {
            if step == self.fail_at {
                return Err(HalocaError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    #[test]
    fn coordinator_failure_stops_every_worker() {
        // First and last step: peers must see the disconnect, never hang.
        for fail_at in [0, 4] {
            let mut sink = FailingSink { fail_at };
            let err = run_local(&config(16, 5), 4, Some(&mut sink)).unwrap_err();
            assert!(matches!(err, HalocaError::Io(_)), "fail_at = {fail_at}");
        }
    }

    #[test]
    fn exact_policy_rejects_uneven_width() {
        let cfg = RingConfig {
            policy: PartitionPolicy::Exact,
            ..config(10, 3)
        };
        assert!(matches!(run_local(&cfg, 4, None), Err(HalocaError::Config(_))));
    }

    #[test]
    fn more_workers_than_cells_is_rejected() {
        assert!(matches!(run_local(&config(3, 1), 4, None), Err(HalocaError::Config(_))));
    }
}
