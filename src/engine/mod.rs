//! Halo-exchange stencil engine.
//!
//! The ring automaton is split into per-worker blocks that trade ghost
//! cells with their neighbours every step; the anneal automaton runs on a
//! single periodic grid evaluated tile by tile. Both have a wgpu backend.

pub mod anneal;
pub mod collect;
pub mod comm;
pub mod comm_local;
#[cfg(feature = "distributed")]
pub mod comm_mpi;
pub mod driver;
pub mod gpu;
pub mod gpu_shaders;
pub mod halo;
pub mod partition;
pub mod step;
