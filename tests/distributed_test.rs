//! Multi-process ring automaton tests.
//!
//! These tests require MPI and the `distributed` feature flag.
//! Run with: mpirun -n 4 cargo test --features distributed --test distributed_test
//!
//! Without MPI installed, these tests are excluded from the default build.

#![cfg(feature = "distributed")]

use haloca::engine::comm::{CommunicationBackend, ROOT};
use haloca::engine::comm_mpi::MpiComm;
use haloca::engine::driver::{run_local, run_rank, RingConfig};
use haloca::ir::{Cell, InitialCondition};

#[test]
fn distributed_ring_matches_local_run() {
    // MPI may only be initialized once per process, so every check lives in
    // this one test. Works for any `mpirun -n` up to the width.
    let _universe = mpi::initialize().expect("MPI init failed");
    let comm = MpiComm::new();

    let config = RingConfig {
        width: 97,
        steps: 50,
        initial: InitialCondition::Random {
            seed: 3,
            density: 0.5,
        },
        ..RingConfig::default()
    };

    let mut snapshots: Vec<Vec<Cell>> = Vec::new();
    let sink: Option<&mut dyn haloca::engine::driver::SnapshotSink> = if comm.rank() == ROOT {
        Some(&mut snapshots)
    } else {
        None
    };
    let last = run_rank(&comm, &config, sink).expect("distributed run failed");
    comm.barrier().expect("barrier failed");

    if comm.rank() == ROOT {
        let mut expected: Vec<Vec<Cell>> = Vec::new();
        let expected_last = run_local(&config, 1, Some(&mut expected)).expect("local run");
        assert_eq!(snapshots, expected);
        assert_eq!(last, Some(expected_last));
    } else {
        assert!(last.is_none());
    }
}
