//! Halo-exchange stencil engine for cellular automata.
//!
//! A 1D ring automaton (Rule 30 by default) is split into contiguous blocks,
//! one per worker; workers swap ghost cells with their ring neighbours before
//! every step and a coordinator gathers the blocks into per-step snapshots.
//! A 2D anneal automaton runs on a periodic grid in parallel tiles. Both
//! automata also run on the GPU through wgpu.

pub mod engine;
pub mod error;
pub mod ir;
pub mod output;
pub mod parser;
pub mod rule;
pub mod stats;
